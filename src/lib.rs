#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Background Removal Service
//!
//! Removes image backgrounds with a segmentation model and serves the result
//! over HTTP.
//!
//! The pipeline runs in six stages:
//!
//! 1. **ImageLoader** ([`services::ImageLoader`]) decodes bytes, files or URLs into an RGB [`types::Raster`]
//! 2. **InputPreprocessor** ([`utils::ImagePreprocessor`]) resizes to the fixed model input and normalizes
//! 3. **Inference** ([`InferenceBackend`]) runs the model through ONNX Runtime or Tract
//! 4. **MaskPostprocessor** ([`utils::MaskPostprocessor`]) rescales and min-max normalizes the output
//! 5. **ComponentFilter** ([`utils::ComponentFilter`]) drops small fragments, keeping dilated large regions
//! 6. **Compositor** ([`services::Compositor`]) attaches the mask as alpha and encodes PNG
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_service::{BackgroundRemovalProcessor, ServiceConfig};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::builder()
//!     .model_path("models/segmentation.onnx")
//!     .build()?;
//! let processor = BackgroundRemovalProcessor::initialize(&config)?;
//! let result = processor.process_file("input.jpg")?;
//! result.save_png("output.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Serving
//!
//! ```rust,no_run
//! use bgremove_service::{server::BackgroundRemovalServer, BackgroundRemovalProcessor, ServiceConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::builder().model_path("model.onnx").build()?;
//! let processor = Arc::new(BackgroundRemovalProcessor::initialize(&config)?);
//! BackgroundRemovalServer::new(processor, config.server)?.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): `bgremove-server` binary and tracing subscriber setup
//! - `tracing-json`, `tracing-files`: extra log outputs for the binary
//! - `webp-support`: WebP input decoding

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod processor;
pub mod server;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use tokio::io::AsyncRead;

pub use config::{ExecutionProvider, PipelineConfig, ServerConfig, ServiceConfig};
pub use error::{BgRemovalError, Result};
pub use inference::InferenceBackend;
pub use processor::{BackendFactory, BackendType, BackgroundRemovalProcessor, DefaultBackendFactory};
pub use services::{Compositor, ImageLoader, ImageSource};
pub use types::{CompositeImage, Mask, ProbabilityMap, Raster, RemovalResult};

/// Remove the background from encoded image bytes
///
/// Loads the model for this one call; long-running callers should keep a
/// [`BackgroundRemovalProcessor`] instead.
///
/// # Examples
/// ```rust,no_run
/// use bgremove_service::{remove_background_from_bytes, ServiceConfig};
///
/// # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
/// let config = ServiceConfig::builder().model_path("model.onnx").build()?;
/// let result = remove_background_from_bytes(upload, &config).await?;
/// let png = result.to_png_bytes()?;
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_bytes(
    image_bytes: Vec<u8>,
    config: &ServiceConfig,
) -> Result<RemovalResult> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        BackgroundRemovalProcessor::initialize(&config)?.process_bytes(&image_bytes)
    })
    .await
    .map_err(|e| BgRemovalError::internal(format!("Processing task failed: {e}")))?
}

/// Remove the background from an async byte stream
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    config: &ServiceConfig,
) -> Result<RemovalResult> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer).await?;
    remove_background_from_bytes(buffer, config).await
}
