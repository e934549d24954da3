//! Tract inference backend
//!
//! Pure Rust alternative to ONNX Runtime. The graph is optimized for the fixed
//! `(1, 3, H, W)` input of the pipeline configuration at load time, so every
//! call must feed exactly that shape.

use crate::config::ServiceConfig;
use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::types::ProbabilityMap;
use instant::Instant;
use ndarray::Array4;
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for the segmentation model
#[derive(Debug)]
pub struct TractBackend {
    model: TractModel,
    input_shape: (usize, usize, usize, usize),
    model_path: PathBuf,
}

impl TractBackend {
    /// List Tract execution providers; only the CPU exists
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_service::backends::TractBackend;
    ///
    /// let providers = TractBackend::list_providers();
    /// assert_eq!(providers.len(), 1);
    /// ```
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Platform: {} / {}, pure Rust inference",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    /// Load, type and optimize the model named by `config.model_path`
    ///
    /// # Errors
    /// - `Model` when the file is missing or the graph cannot be typed for the
    ///   configured input size
    pub fn load(config: &ServiceConfig) -> Result<Self> {
        let model_path = config.model_path.clone();
        if !model_path.is_file() {
            return Err(BgRemovalError::model_error_with_context(
                "load",
                &model_path,
                "file not found",
                &["pass --model", "set BGREMOVE_MODEL_PATH"],
            ));
        }

        let input_shape = config.pipeline.input_shape();
        let (batch, channels, height, width) = input_shape;
        let load_start = Instant::now();
        let model_error = |stage: &str, e: &dyn std::fmt::Display| {
            BgRemovalError::model_error_with_context(
                stage,
                &model_path,
                &e.to_string(),
                &["verify the file is a valid ONNX graph"],
            )
        };

        let graph = onnx()
            .model_for_path(&model_path)
            .map_err(|e| model_error("load", &e))?;
        let input_name = graph
            .input_outlets()
            .ok()
            .and_then(|outlets| outlets.first().map(|outlet| graph.node(outlet.node).name.clone()))
            .unwrap_or_default();
        let output_name = graph
            .output_outlets()
            .ok()
            .and_then(|outlets| outlets.first().map(|outlet| graph.node(outlet.node).name.clone()))
            .unwrap_or_default();

        let model = graph
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(batch, channels, height, width)),
            )
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| model_error("optimize", &e))?;

        log::info!(
            "Tract model loaded from {} in {:.0}ms",
            model_path.display(),
            load_start.elapsed().as_secs_f64() * 1000.0
        );
        log::debug!("  - Input: {input_name} {input_shape:?}, output: {output_name}");

        Ok(Self {
            model,
            input_shape,
            model_path,
        })
    }

    /// Input shape the graph was optimized for
    #[must_use]
    pub fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.input_shape
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

impl InferenceBackend for TractBackend {
    fn infer(&self, input: &Array4<f32>) -> Result<ProbabilityMap> {
        check_input_shape(self.input_shape, input.dim())?;

        let start = Instant::now();
        log::debug!("Running Tract inference, input shape {:?}", input.dim());

        let outputs = self
            .model
            .run(tvec![Tensor::from(input.clone()).into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();
        let output = output
            .to_array_view::<f32>()
            .map_err(|e| BgRemovalError::inference(format!("Failed to convert output tensor: {e}")))?
            .to_owned();

        log::debug!(
            "Tract inference complete in {:.2}ms, output shape {:?}",
            start.elapsed().as_secs_f64() * 1000.0,
            output.shape()
        );
        ProbabilityMap::from_output(output)
    }

    fn name(&self) -> &str {
        "tract"
    }
}

/// The optimized plan only accepts the shape it was typed for
fn check_input_shape(
    expected: (usize, usize, usize, usize),
    actual: (usize, usize, usize, usize),
) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(BgRemovalError::inference(format!(
            "Tract model expects input {expected:?}, got {actual:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_model_error() {
        let config = ServiceConfig::builder()
            .model_path("/nonexistent/segmentation.onnx")
            .build()
            .unwrap();
        let err = TractBackend::load(&config).unwrap_err();
        assert!(matches!(err, BgRemovalError::Model(_)));
    }

    #[test]
    fn test_invalid_graph_is_model_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, [0xFF_u8; 64]).unwrap();

        let config = ServiceConfig::builder().model_path(&path).build().unwrap();
        assert!(matches!(
            TractBackend::load(&config),
            Err(BgRemovalError::Model(_))
        ));
    }

    #[test]
    fn test_only_cpu_provider() {
        let providers = TractBackend::list_providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].0, "CPU");
        assert!(providers[0].1);
    }

    #[test]
    fn test_input_shape_mismatch_is_inference_error() {
        assert!(check_input_shape((1, 3, 1200, 1800), (1, 3, 1200, 1800)).is_ok());

        let err = check_input_shape((1, 3, 1200, 1800), (1, 3, 12, 18)).unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
        assert_eq!(err.kind(), "inference");
        assert!(err.to_string().contains("(1, 3, 12, 18)"));
    }
}
