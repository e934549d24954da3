//! Input preprocessing: raster to model tensor

use crate::{
    config::PipelineConfig,
    error::Result,
    types::Raster,
    utils::{resample::resize_bilinear_chw, validation::TensorValidator},
};
use ndarray::{Array3, Array4, Axis};

/// Converts rasters into the fixed-shape normalized tensor the model expects
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    target_height: usize,
    target_width: usize,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImagePreprocessor {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            target_height: config.input_height,
            target_width: config.input_width,
            mean: config.normalization_mean,
            std: config.normalization_std,
        }
    }

    /// Model input shape `(1, 3, H, W)`
    #[must_use]
    pub fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, self.target_height, self.target_width)
    }

    /// Prepare a raster for inference
    ///
    /// Grayscale is replicated to three channels and alpha is dropped. The
    /// planes are resized bilinearly to the model input size and truncated to
    /// 8 bits before scaling to [0, 1] and normalizing, reproducing the
    /// quantization the model saw during training.
    ///
    /// # Errors
    /// - Zero-area raster
    /// - Channel count other than 1, 3 or 4
    pub fn prepare(&self, raster: &Raster) -> Result<Array4<f32>> {
        let (height, width) = raster.dimensions();
        TensorValidator::validate_raster_shape(height, width, raster.channels())?;

        let planes = Self::to_channel_first(raster);
        let mut tensor = resize_bilinear_chw(planes.view(), self.target_height, self.target_width);
        for (channel, mut plane) in tensor.outer_iter_mut().enumerate() {
            let (mean, std) = match (self.mean.get(channel), self.std.get(channel)) {
                (Some(mean), Some(std)) => (*mean, *std),
                _ => (0.0, 1.0),
            };
            plane.mapv_inplace(|value| {
                let quantized = f32::from(value as u8);
                (quantized / 255.0 - mean) / std
            });
        }

        let tensor = tensor.insert_axis(Axis(0));
        TensorValidator::validate_tensor_shape(&tensor, self.output_shape())?;
        Ok(tensor)
    }

    /// `(H, W, C)` bytes to `(3, H, W)` floats, replicating grayscale and dropping alpha
    fn to_channel_first(raster: &Raster) -> Array3<f32> {
        let data = raster.data();
        let (height, width, channels) = data.dim();
        Array3::from_shape_fn((3, height, width), |(c, y, x)| {
            let source_channel = if channels == 1 { 0 } else { c };
            f32::from(data[[y, x, source_channel]])
        })
    }
}
