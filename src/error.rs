//! Error types for background removal operations

use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Error kinds produced by the removal pipeline and its collaborators
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Input/output errors (temp staging, reading inputs, writing outputs)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Bytes could not be decoded as a supported raster format
    #[error("Decode error: {0}")]
    Decode(String),

    /// Remote image source unreachable or answered with a non-2xx status
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Raster or tensor with an unusable shape (zero area, bad channel count)
    #[error("Shape error: {0}")]
    Shape(String),

    /// Inference engine runtime failure
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model output is flat, so min-max normalization is undefined
    #[error("Degenerate model output: {0}")]
    DegenerateOutput(String),

    /// Raster and mask dimensions disagree
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model artifact missing, corrupt or unloadable
    #[error("Model error: {0}")]
    Model(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgRemovalError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new fetch error
    pub fn fetch<S: Into<String>>(msg: S) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a new shape error
    pub fn shape<S: Into<String>>(msg: S) -> Self {
        Self::Shape(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new degenerate output error
    pub fn degenerate_output<S: Into<String>>(msg: S) -> Self {
        Self::DegenerateOutput(msg.into())
    }

    /// Create a new shape mismatch error
    pub fn shape_mismatch<S: Into<String>>(msg: S) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {operation} '{path_display}': {error}"),
        ))
    }

    /// Create model error with troubleshooting context
    pub fn model_error_with_context<P: AsRef<std::path::Path>>(
        operation: &str,
        model_path: P,
        error: &str,
        suggestions: &[&str],
    ) -> Self {
        let path_display = model_path.as_ref().display();
        let suggestion_text = if suggestions.is_empty() {
            String::new()
        } else {
            format!(" Suggestions: {}", suggestions.join(", "))
        };

        Self::Model(format!(
            "Failed to {operation} model '{path_display}': {error}.{suggestion_text}"
        ))
    }

    /// Short, stable name of the error kind, used as a structured log field
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Image(_) => "image",
            Self::Decode(_) => "decode",
            Self::Fetch(_) => "fetch",
            Self::Shape(_) => "shape",
            Self::Inference(_) => "inference",
            Self::DegenerateOutput(_) => "degenerate_output",
            Self::ShapeMismatch(_) => "shape_mismatch",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Model(_) => "model",
            Self::Internal(_) => "internal",
        }
    }
}
