//! Background removal pipeline orchestration
//!
//! `BackgroundRemovalProcessor` chains the pipeline stages around an injected
//! inference backend. It holds no per-request state, so one instance behind an
//! `Arc` serves concurrent requests.

use crate::{
    config::{PipelineConfig, ServiceConfig},
    error::Result,
    inference::InferenceBackend,
    services::{Compositor, ImageLoader},
    types::{ProcessingTimings, Raster, RemovalResult},
    utils::{ComponentFilter, ImagePreprocessor, MaskPostprocessor},
};
use instant::Instant;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info as trace_info, instrument, span, Level};

/// Backend type enumeration for runtime selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create and load the backend named by `config.backend_type`
    ///
    /// # Errors
    /// - Backend compiled out of this build
    /// - Model file missing or corrupt
    fn create_backend(&self, config: &ServiceConfig) -> Result<Arc<dyn InferenceBackend>>;

    /// Backend types this factory can create
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends compiled into this build
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, config: &ServiceConfig) -> Result<Arc<dyn InferenceBackend>> {
        match config.backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Arc::new(crate::backends::OnnxBackend::load(config)?)),
            #[cfg(not(feature = "onnx"))]
            BackendType::Onnx => Err(crate::error::BgRemovalError::invalid_config(
                "ONNX backend not compiled in. Rebuild with --features onnx",
            )),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Arc::new(crate::backends::TractBackend::load(config)?)),
            #[cfg(not(feature = "tract"))]
            BackendType::Tract => Err(crate::error::BgRemovalError::invalid_config(
                "Tract backend not compiled in. Rebuild with --features tract",
            )),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

/// Pipeline from raster to composite around one shared inference backend
pub struct BackgroundRemovalProcessor {
    backend: Arc<dyn InferenceBackend>,
    preprocessor: ImagePreprocessor,
    postprocessor: MaskPostprocessor,
    filter: ComponentFilter,
}

impl fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("backend", &self.backend.name())
            .field("preprocessor", &self.preprocessor)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Build a processor around an already loaded backend
    ///
    /// # Errors
    /// - Invalid pipeline parameters
    ///
    /// # Examples
    /// ```rust,no_run
    /// use bgremove_service::{BackgroundRemovalProcessor, PipelineConfig};
    /// # fn example(backend: std::sync::Arc<dyn bgremove_service::InferenceBackend>) -> bgremove_service::Result<()> {
    /// let processor = BackgroundRemovalProcessor::new(backend, &PipelineConfig::default())?;
    /// let result = processor.process_file("photo.jpg")?;
    /// result.save_png("photo_nobg.png")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(backend: Arc<dyn InferenceBackend>, pipeline: &PipelineConfig) -> Result<Self> {
        pipeline.validate()?;
        Ok(Self {
            backend,
            preprocessor: ImagePreprocessor::new(pipeline),
            postprocessor: MaskPostprocessor::new(),
            filter: ComponentFilter::new(pipeline),
        })
    }

    /// Load the configured backend with the default factory
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Model file missing or corrupt
    pub fn initialize(config: &ServiceConfig) -> Result<Self> {
        Self::initialize_with_factory(config, &DefaultBackendFactory)
    }

    /// Load the configured backend through `factory`
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Backend creation failure
    pub fn initialize_with_factory(
        config: &ServiceConfig,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        config.validate()?;
        info!("Initializing background removal processor");
        debug!("Model path: {}", config.model_path.display());
        debug!("Backend type: {}", config.backend_type);
        debug!("Execution provider: {}", config.execution_provider);

        let start = Instant::now();
        let backend = factory.create_backend(config)?;
        info!(
            "Processor ready with {} backend in {:.0}ms",
            backend.name(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Self::new(backend, &config.pipeline)
    }

    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Run the full pipeline on a decoded raster
    ///
    /// # Errors
    /// - `Shape` for empty rasters or unsupported channel counts
    /// - `Inference` when the backend fails or returns a malformed map
    /// - `DegenerateOutput` when the model output is constant
    #[instrument(
        skip(self, raster),
        fields(
            backend = %self.backend.name(),
            dimensions = %format!("{}x{}", raster.width(), raster.height())
        )
    )]
    pub fn process_raster(&self, raster: &Raster) -> Result<RemovalResult> {
        let mut timings = ProcessingTimings::default();
        let total_start = Instant::now();
        let original_dimensions = raster.dimensions();

        trace_info!(backend = %self.backend.name(), "Starting image processing");

        let tensor = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                height = original_dimensions.0,
                width = original_dimensions.1
            )
            .entered();
            let start = Instant::now();
            let tensor = self.preprocessor.prepare(raster)?;
            timings.preprocessing_ms = elapsed_ms(start);
            tensor
        };

        let probabilities = {
            let _span = span!(Level::INFO, "inference", backend = %self.backend.name()).entered();
            let start = Instant::now();
            let probabilities = self.backend.infer(&tensor)?;
            timings.inference_ms = elapsed_ms(start);
            probabilities
        };
        drop(tensor);

        let mask = {
            let _span = span!(Level::DEBUG, "postprocessing").entered();
            let start = Instant::now();
            let mask = self
                .postprocessor
                .postprocess(&probabilities, original_dimensions)?;
            timings.postprocessing_ms = elapsed_ms(start);
            mask
        };

        let mask = {
            let _span = span!(Level::DEBUG, "component_filter").entered();
            let start = Instant::now();
            let filtered = self.filter.filter(&mask);
            timings.filtering_ms = elapsed_ms(start);
            filtered
        };

        let composite = {
            let _span = span!(Level::DEBUG, "compositing").entered();
            let start = Instant::now();
            let composite = Compositor::composite(raster, &mask)?;
            timings.compositing_ms = elapsed_ms(start);
            composite
        };

        timings.total_ms = elapsed_ms(total_start);
        let statistics = mask.statistics();
        debug!("{}", timings.summary());
        debug!(
            "Foreground ratio {:.3} ({} of {} pixels)",
            statistics.foreground_ratio, statistics.foreground_pixels, statistics.total_pixels
        );

        Ok(RemovalResult {
            composite,
            mask,
            original_dimensions,
            timings,
            statistics,
            origin: raster.origin().map(str::to_string),
        })
    }

    /// Decode encoded image bytes and run the pipeline
    ///
    /// # Errors
    /// - `Decode` for empty or unsupported data
    /// - Any error of [`Self::process_raster`]
    pub fn process_bytes(&self, bytes: &[u8]) -> Result<RemovalResult> {
        let start = Instant::now();
        let raster = ImageLoader::decode(bytes)?;
        let decode_ms = elapsed_ms(start);
        let mut result = self.process_raster(&raster)?;
        result.timings.image_decode_ms = decode_ms;
        result.timings.total_ms += decode_ms;
        Ok(result)
    }

    /// Read, decode and process a local image file
    ///
    /// # Errors
    /// - `Io` when the file cannot be read
    /// - Any error of [`Self::process_bytes`]
    pub fn process_file<P: AsRef<Path>>(&self, path: P) -> Result<RemovalResult> {
        let start = Instant::now();
        let raster = ImageLoader::load_path(path)?;
        let decode_ms = elapsed_ms(start);
        let mut result = self.process_raster(&raster)?;
        result.timings.image_decode_ms = decode_ms;
        result.timings.total_ms += decode_ms;
        Ok(result)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
