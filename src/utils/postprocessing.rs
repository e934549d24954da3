//! Output postprocessing: model map to alpha mask

use crate::{
    error::{BgRemovalError, Result},
    types::{Mask, ProbabilityMap},
    utils::{resample::resize_bilinear_2d, validation::TensorValidator},
};

/// Rescales a raw model map to the original resolution and normalizes it to 0..=255
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskPostprocessor;

impl MaskPostprocessor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Produce an `(H, W, 1)` mask for an image of `original_size = (H, W)`
    ///
    /// The map is resized bilinearly, min-max normalized over the whole map,
    /// scaled by 255 and truncated to 8 bits.
    ///
    /// # Errors
    /// - Non-finite values in the map
    /// - Zero-area target size
    /// - Flat map (maximum equals minimum)
    pub fn postprocess(&self, map: &ProbabilityMap, original_size: (usize, usize)) -> Result<Mask> {
        let (height, width) = original_size;
        if height == 0 || width == 0 {
            return Err(BgRemovalError::shape(format!(
                "Cannot rescale mask to zero area {width}x{height}"
            )));
        }
        TensorValidator::validate_finite(map.values().view())?;

        let resized = resize_bilinear_2d(map.values().view(), height, width);
        let (min, max) = resized
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        let range = max - min;
        if range <= 0.0 || !range.is_finite() {
            return Err(BgRemovalError::degenerate_output(format!(
                "Model output is constant ({min}), cannot normalize"
            )));
        }

        tracing::trace!(min, max, "Normalizing output map");
        let alpha = resized.mapv(|v| (((v - min) / range) * 255.0) as u8);
        Ok(Mask::from_gray(alpha))
    }
}
