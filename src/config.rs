//! Configuration types for the background removal service
//!
//! Configuration is layered: built-in defaults, then an optional JSON file,
//! then environment variables, then command-line flags (applied by the CLI).

use crate::error::{BgRemovalError, Result};
use crate::processor::BackendType;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variable overriding the model artifact path
pub const ENV_MODEL_PATH: &str = "BGREMOVE_MODEL_PATH";
/// Environment variable overriding the HTTP bind address
pub const ENV_BIND_ADDR: &str = "BGREMOVE_BIND_ADDR";
/// Environment variable overriding the allowed CORS origin
pub const ENV_ALLOWED_ORIGIN: &str = "BGREMOVE_ALLOWED_ORIGIN";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Numeric parameters of the removal pipeline
///
/// The defaults match the preprocessing the segmentation model was trained with
/// and the mask cleanup thresholds tuned against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model input height in pixels
    pub input_height: usize,
    /// Model input width in pixels
    pub input_width: usize,
    /// Per-channel mean subtracted after scaling to [0, 1]
    pub normalization_mean: [f32; 3],
    /// Per-channel divisor applied after mean subtraction
    pub normalization_std: [f32; 3],
    /// Mask intensities strictly above this value count as foreground when labeling
    pub binarize_threshold: u8,
    /// Minimum component area at the reference resolution
    pub area_reference: f64,
    /// Reference resolution `(height, width)` the area threshold is expressed in
    pub area_reference_size: (usize, usize),
    /// Side length of the elliptical dilation kernel (odd)
    pub dilation_kernel_size: usize,
    /// Number of dilation passes applied to the keep-mask
    pub dilation_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_height: 1200,
            input_width: 1800,
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
            binarize_threshold: 25,
            area_reference: 50_000.0,
            area_reference_size: (1200, 1800),
            dilation_kernel_size: 9,
            dilation_iterations: 2,
        }
    }
}

impl PipelineConfig {
    /// Validate pipeline parameters
    ///
    /// # Errors
    /// - Zero-sized model input or reference resolution
    /// - Zero or non-finite normalization divisor
    /// - Even or zero dilation kernel size
    pub fn validate(&self) -> Result<()> {
        if self.input_height == 0 || self.input_width == 0 {
            return Err(BgRemovalError::invalid_config(format!(
                "Model input size must be non-zero, got {}x{}",
                self.input_width, self.input_height
            )));
        }
        if self.area_reference_size.0 == 0 || self.area_reference_size.1 == 0 {
            return Err(BgRemovalError::invalid_config(
                "Area reference resolution must be non-zero",
            ));
        }
        if !self.area_reference.is_finite() || self.area_reference < 0.0 {
            return Err(BgRemovalError::invalid_config(format!(
                "Area reference must be a non-negative number, got {}",
                self.area_reference
            )));
        }
        if self
            .normalization_std
            .iter()
            .any(|std| *std == 0.0 || !std.is_finite())
        {
            return Err(BgRemovalError::invalid_config(
                "Normalization std values must be finite and non-zero",
            ));
        }
        if self.dilation_kernel_size == 0 || self.dilation_kernel_size % 2 == 0 {
            return Err(BgRemovalError::invalid_config(format!(
                "Dilation kernel size must be odd, got {}",
                self.dilation_kernel_size
            )));
        }
        Ok(())
    }

    /// Model input tensor shape `(batch, channels, height, width)`
    #[must_use]
    pub fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, self.input_height, self.input_width)
    }
}

/// HTTP endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind_address: String,
    /// Origin allowed by CORS (no CORS headers when unset)
    pub allowed_origin: Option<String>,
    /// Maximum accepted request body size
    pub max_body_bytes: usize,
    /// Stage request bodies and results in a per-request temp directory
    pub stage_to_disk: bool,
    /// Parent directory for staged requests (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,
    /// Timeout for fetching remote image sources
    pub fetch_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7000".to_string(),
            allowed_origin: None,
            max_body_bytes: 32 * 1024 * 1024,
            stage_to_disk: false,
            staging_dir: None,
            fetch_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Parse the configured bind address
    ///
    /// # Errors
    /// - Bind address is not a valid `host:port` socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_address.parse().map_err(|e| {
            BgRemovalError::invalid_config(format!(
                "Invalid bind address '{}': {e}",
                self.bind_address
            ))
        })
    }

    /// Validate server parameters
    ///
    /// # Errors
    /// - Unparseable bind address
    /// - Zero body size limit or fetch timeout
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.max_body_bytes == 0 {
            return Err(BgRemovalError::invalid_config(
                "Maximum body size must be non-zero",
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(BgRemovalError::invalid_config(
                "Fetch timeout must be at least one second",
            ));
        }
        Ok(())
    }
}

/// Complete configuration of the background removal service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Path to the serialized segmentation model
    pub model_path: PathBuf,
    /// Inference backend
    pub backend_type: BackendType,
    /// Execution provider for the ONNX backend
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
    /// Pipeline numeric parameters
    pub pipeline: PipelineConfig,
    /// HTTP endpoint parameters
    pub server: ServerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model.onnx"),
            backend_type: BackendType::Onnx,
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
            pipeline: PipelineConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_service::{ExecutionProvider, ServiceConfig};
    ///
    /// let config = ServiceConfig::builder()
    ///     .model_path("models/segmentation.onnx")
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .bind_address("127.0.0.1:8080")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.server.bind_address, "127.0.0.1:8080");
    /// ```
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Load configuration from a JSON file; missing fields take their defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid JSON for this schema
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| BgRemovalError::file_io_error("read config file", path_ref, &e))?;
        Self::from_json_str(&content).map_err(|e| {
            BgRemovalError::invalid_config(format!("{}: {e}", path_ref.display()))
        })
    }

    /// Parse configuration from a JSON string
    ///
    /// # Errors
    /// - Invalid JSON or schema mismatch
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| BgRemovalError::invalid_config(format!("Invalid config JSON: {e}")))
    }

    /// Apply overrides from process environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_MODEL_PATH).filter(|v| !v.is_empty()) {
            log::debug!("Model path overridden by {ENV_MODEL_PATH}: {path}");
            self.model_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup(ENV_BIND_ADDR).filter(|v| !v.is_empty()) {
            log::debug!("Bind address overridden by {ENV_BIND_ADDR}: {addr}");
            self.server.bind_address = addr;
        }
        if let Some(origin) = lookup(ENV_ALLOWED_ORIGIN).filter(|v| !v.is_empty()) {
            log::debug!("Allowed origin overridden by {ENV_ALLOWED_ORIGIN}: {origin}");
            self.server.allowed_origin = Some(origin);
        }
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Empty model path
    /// - Invalid pipeline or server parameters
    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(BgRemovalError::invalid_config("Model path must not be empty"));
        }
        self.pipeline.validate()?;
        self.server.validate()
    }
}

/// Builder for `ServiceConfig`
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Start from an existing configuration
    #[must_use]
    pub fn from_config(config: ServiceConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.model_path = path.into();
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set both intra and inter threads (inter gets half, minimum 1; 0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    #[must_use]
    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.config.pipeline = pipeline;
        self
    }

    #[must_use]
    pub fn bind_address<S: Into<String>>(mut self, address: S) -> Self {
        self.config.server.bind_address = address.into();
        self
    }

    #[must_use]
    pub fn allowed_origin<S: Into<String>>(mut self, origin: S) -> Self {
        self.config.server.allowed_origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.config.server.max_body_bytes = bytes;
        self
    }

    #[must_use]
    pub fn stage_to_disk(mut self, stage: bool) -> Self {
        self.config.server.stage_to_disk = stage;
        self
    }

    #[must_use]
    pub fn staging_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.server.staging_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.server.fetch_timeout_secs = secs;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any validation failure from [`ServiceConfig::validate`]
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.model_path, PathBuf::from("model.onnx"));
        assert_eq!(config.backend_type, BackendType::Onnx);
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);
        assert_eq!(config.pipeline.input_shape(), (1, 3, 1200, 1800));
        assert_eq!(config.pipeline.binarize_threshold, 25);
        assert_eq!(config.pipeline.dilation_kernel_size, 9);
        assert_eq!(config.pipeline.dilation_iterations, 2);
        assert!(!config.server.stage_to_disk);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ServiceConfig::builder()
            .model_path("/models/seg.onnx")
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cpu)
            .num_threads(8)
            .bind_address("127.0.0.1:9000")
            .allowed_origin("http://localhost:4200")
            .stage_to_disk(true)
            .build()
            .unwrap();

        assert_eq!(config.model_path, PathBuf::from("/models/seg.onnx"));
        assert_eq!(config.backend_type, BackendType::Tract);
        assert_eq!(config.intra_threads, 8);
        assert_eq!(config.inter_threads, 4);
        assert_eq!(
            config.server.allowed_origin.as_deref(),
            Some("http://localhost:4200")
        );
        assert!(config.server.stage_to_disk);
    }

    #[test]
    fn test_config_validation_errors() {
        assert!(ServiceConfig::builder().bind_address("not-an-address").build().is_err());
        assert!(ServiceConfig::builder().model_path("").build().is_err());
        assert!(ServiceConfig::builder().max_body_bytes(0).build().is_err());

        let pipeline = PipelineConfig {
            dilation_kernel_size: 8,
            ..PipelineConfig::default()
        };
        assert!(ServiceConfig::builder().pipeline(pipeline).build().is_err());

        let pipeline = PipelineConfig {
            normalization_std: [1.0, 0.0, 1.0],
            ..PipelineConfig::default()
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ServiceConfig::from_json_str(
            r#"{
                "model_path": "weights/model.onnx",
                "execution_provider": "coreml",
                "server": { "bind_address": "127.0.0.1:7100" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.model_path, PathBuf::from("weights/model.onnx"));
        assert_eq!(config.execution_provider, ExecutionProvider::CoreMl);
        assert_eq!(config.server.bind_address, "127.0.0.1:7100");
        assert_eq!(config.server.max_body_bytes, 32 * 1024 * 1024);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = ServiceConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        let config = ServiceConfig::builder()
            .model_path("a.onnx")
            .fetch_timeout_secs(5)
            .build()
            .unwrap();
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = ServiceConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_MODEL_PATH, "/srv/model.onnx"),
            (ENV_BIND_ADDR, "127.0.0.1:7001"),
            (ENV_ALLOWED_ORIGIN, ""),
        ]
        .into_iter()
        .collect();

        let mut config = ServiceConfig::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.model_path, PathBuf::from("/srv/model.onnx"));
        assert_eq!(config.server.bind_address, "127.0.0.1:7001");
        assert!(config.server.allowed_origin.is_none());
    }

    #[test]
    fn test_execution_provider_display() {
        assert_eq!(ExecutionProvider::Auto.to_string(), "auto");
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
        assert_eq!(
            serde_json::to_string(&ExecutionProvider::Cuda).unwrap(),
            "\"cuda\""
        );
    }
}
