//! ONNX Runtime inference backend
//!
//! Loads the segmentation model once, discovers its input and output names
//! from the session signature and serializes calls through a mutex, since
//! running an `ort` session needs exclusive access.

use crate::config::{ExecutionProvider, ServiceConfig};
use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::types::ProbabilityMap;
use instant::Instant;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// ONNX Runtime backend for the segmentation model
#[derive(Debug)]
pub struct OnnxBackend {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    model_path: PathBuf,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers with availability and description
    ///
    /// # Examples
    /// ```rust,no_run
    /// use bgremove_service::backends::OnnxBackend;
    ///
    /// for (name, available, description) in OnnxBackend::list_providers() {
    ///     println!("{name}: {available} - {description}");
    /// }
    /// ```
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Platform: {} / {}, {} CPU cores",
            std::env::consts::OS,
            std::env::consts::ARCH,
            available_cores()
        );

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Load the model named by `config.model_path`
    ///
    /// # Errors
    /// - `Model` when the file is missing, corrupt, or declares no inputs/outputs
    pub fn load(config: &ServiceConfig) -> Result<Self> {
        let model_path = config.model_path.clone();
        if !model_path.is_file() {
            return Err(BgRemovalError::model_error_with_context(
                "load",
                &model_path,
                "file not found",
                &[
                    "pass --model",
                    "set BGREMOVE_MODEL_PATH",
                    "check the path is readable",
                ],
            ));
        }

        let load_start = Instant::now();
        let builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to create session builder: {e}"))
            })?;
        let builder = Self::with_providers(builder, config.execution_provider)?;

        let (intra_threads, inter_threads) = Self::thread_counts(config);
        let session = builder
            .with_parallel_execution(true)
            .and_then(|b| b.with_intra_threads(intra_threads))
            .and_then(|b| b.with_inter_threads(inter_threads))
            .and_then(|b| b.commit_from_file(&model_path))
            .map_err(|e| {
                BgRemovalError::model_error_with_context(
                    "load",
                    &model_path,
                    &e.to_string(),
                    &["verify the file is a valid ONNX graph"],
                )
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| BgRemovalError::model("Model declares no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| BgRemovalError::model("Model declares no outputs"))?;

        log::info!(
            "ONNX model loaded from {} in {:.0}ms",
            model_path.display(),
            load_start.elapsed().as_secs_f64() * 1000.0
        );
        log::debug!("  - Input: {input_name}, output: {output_name}");
        log::debug!("  - Threading: {intra_threads} intra-op, {inter_threads} inter-op");
        log::debug!("  - Requested provider: {}", config.execution_provider);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            model_path,
        })
    }

    /// Input name discovered from the model signature
    #[must_use]
    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Output name discovered from the model signature
    #[must_use]
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn thread_counts(config: &ServiceConfig) -> (usize, usize) {
        let cores = available_cores();
        let intra = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };
        (intra, inter)
    }

    /// Register execution providers; unavailable accelerators fall back to CPU
    fn with_providers(
        builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let cuda = CUDAExecutionProvider::default();
        let coreml = CoreMLExecutionProvider::default().with_subgraphs(true);
        let cuda_available = OrtExecutionProvider::is_available(&cuda).unwrap_or(false);
        let coreml_available = OrtExecutionProvider::is_available(&coreml).unwrap_or(false);

        let providers = match provider {
            ExecutionProvider::Cpu => Vec::new(),
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if cuda_available {
                    providers.push(cuda.build());
                }
                if coreml_available {
                    providers.push(coreml.build());
                }
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                }
                providers
            },
            ExecutionProvider::Cuda if cuda_available => vec![cuda.build()],
            ExecutionProvider::CoreMl if coreml_available => vec![coreml.build()],
            requested => {
                log::warn!("{requested} execution provider requested but not available, falling back to CPU");
                Vec::new()
            },
        };

        if providers.is_empty() {
            return Ok(builder);
        }
        log::info!("Registering {} execution provider(s)", providers.len());
        builder.with_execution_providers(providers).map_err(|e| {
            BgRemovalError::model(format!("Failed to set execution providers: {e}"))
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn infer(&self, input: &Array4<f32>) -> Result<ProbabilityMap> {
        let start = Instant::now();
        log::debug!("Running ONNX inference, input shape {:?}", input.dim());

        let tensor = Tensor::from_array(input.clone())
            .map_err(|e| BgRemovalError::inference(format!("Failed to convert input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| BgRemovalError::inference("ONNX session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| {
                BgRemovalError::inference(format!("Output '{}' not found", self.output_name))
            })?
            .try_extract_array::<f32>()
            .map_err(|e| BgRemovalError::inference(format!("Failed to extract output tensor: {e}")))?
            .to_owned();
        drop(outputs);
        drop(session);

        log::debug!(
            "ONNX inference complete in {:.2}ms, output shape {:?}",
            start.elapsed().as_secs_f64() * 1000.0,
            output.shape()
        );
        ProbabilityMap::from_output(output)
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

impl Drop for OnnxBackend {
    fn drop(&mut self) {
        log::debug!("Releasing ONNX session for {}", self.model_path.display());
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
