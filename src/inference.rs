//! Inference backend abstraction

use crate::{error::Result, types::ProbabilityMap};
use ndarray::Array4;

/// Tensor-in/map-out capability of a loaded segmentation model
///
/// Implementations are loaded once and shared across concurrent requests, so
/// `infer` takes `&self`. Backends that need exclusive access to their engine
/// serialize it internally.
pub trait InferenceBackend: Send + Sync {
    /// Run the model on a `(1, 3, H, W)` input tensor
    ///
    /// # Errors
    /// - Any engine runtime failure (shape mismatch, device unavailable)
    /// - Output that cannot be squeezed to a single-channel map
    fn infer(&self, input: &Array4<f32>) -> Result<ProbabilityMap>;

    /// Short backend name for logs
    fn name(&self) -> &str {
        "unknown"
    }
}

impl<T: InferenceBackend + ?Sized> InferenceBackend for std::sync::Arc<T> {
    fn infer(&self, input: &Array4<f32>) -> Result<ProbabilityMap> {
        (**self).infer(input)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
