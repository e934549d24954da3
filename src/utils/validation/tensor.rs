//! Tensor and raster shape validation
//!
//! Centralizes the shape checks the pipeline stages run on their inputs.

use crate::error::{BgRemovalError, Result};
use ndarray::{Array4, ArrayView2};

/// Validator for tensor shapes and raster dimensions
pub struct TensorValidator;

impl TensorValidator {
    /// Validate tensor shape matches expected dimensions
    ///
    /// # Errors
    /// - Shape differs from `expected_shape`
    pub fn validate_tensor_shape(
        tensor: &Array4<f32>,
        expected_shape: (usize, usize, usize, usize),
    ) -> Result<()> {
        let actual = tensor.dim();
        if actual != expected_shape {
            let (batch, channels, height, width) = expected_shape;
            return Err(BgRemovalError::shape(format!(
                "Tensor shape mismatch. Expected [{batch}, {channels}, {height}, {width}], got [{}, {}, {}, {}]",
                actual.0, actual.1, actual.2, actual.3
            )));
        }
        Ok(())
    }

    /// Validate a raster has non-zero area and 1, 3 or 4 channels
    ///
    /// # Errors
    /// - Zero height or width
    /// - Unsupported channel count
    pub fn validate_raster_shape(height: usize, width: usize, channels: usize) -> Result<()> {
        if height == 0 || width == 0 {
            return Err(BgRemovalError::shape(format!(
                "Image has zero area: {width}x{height}"
            )));
        }
        if !matches!(channels, 1 | 3 | 4) {
            return Err(BgRemovalError::shape(format!(
                "Unsupported channel count {channels}, expected 1, 3 or 4"
            )));
        }
        Ok(())
    }

    /// Validate two `(height, width)` pairs agree
    ///
    /// # Errors
    /// - Dimensions differ
    pub fn validate_same_dimensions(
        what: &str,
        left: (usize, usize),
        right: (usize, usize),
    ) -> Result<()> {
        if left != right {
            return Err(BgRemovalError::shape_mismatch(format!(
                "{what}: {}x{} vs {}x{}",
                left.1, left.0, right.1, right.0
            )));
        }
        Ok(())
    }

    /// Validate every value of a map is finite
    ///
    /// # Errors
    /// - NaN or infinity present
    pub fn validate_finite(values: ArrayView2<'_, f32>) -> Result<()> {
        if let Some(value) = values.iter().find(|v| !v.is_finite()) {
            return Err(BgRemovalError::inference(format!(
                "Model output contains non-finite value {value}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    #[test]
    fn test_validate_tensor_shape() {
        let tensor = Array::zeros((1, 3, 12, 18));
        assert!(TensorValidator::validate_tensor_shape(&tensor, (1, 3, 12, 18)).is_ok());

        let err = TensorValidator::validate_tensor_shape(&tensor, (1, 3, 1200, 1800)).unwrap_err();
        assert!(matches!(err, BgRemovalError::Shape(_)));
        assert!(err.to_string().contains("[1, 3, 12, 18]"));
    }

    #[test]
    fn test_validate_raster_shape() {
        assert!(TensorValidator::validate_raster_shape(10, 10, 1).is_ok());
        assert!(TensorValidator::validate_raster_shape(10, 10, 3).is_ok());
        assert!(TensorValidator::validate_raster_shape(10, 10, 4).is_ok());
        assert!(TensorValidator::validate_raster_shape(10, 10, 2).is_err());
        assert!(TensorValidator::validate_raster_shape(0, 10, 3).is_err());
        assert!(TensorValidator::validate_raster_shape(10, 0, 3).is_err());
    }

    #[test]
    fn test_validate_same_dimensions() {
        assert!(TensorValidator::validate_same_dimensions("mask", (4, 5), (4, 5)).is_ok());
        let err = TensorValidator::validate_same_dimensions("mask", (4, 5), (5, 4)).unwrap_err();
        assert!(matches!(err, BgRemovalError::ShapeMismatch(_)));
    }

    #[test]
    fn test_validate_finite() {
        assert!(TensorValidator::validate_finite(array![[0.0_f32, 1.0]].view()).is_ok());
        assert!(TensorValidator::validate_finite(array![[0.0_f32, f32::NAN]].view()).is_err());
        assert!(TensorValidator::validate_finite(array![[f32::INFINITY]].view()).is_err());
    }
}
