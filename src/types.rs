//! Core data types flowing through the removal pipeline

use crate::error::{BgRemovalError, Result};
use image::{DynamicImage, GrayImage, RgbaImage};
use ndarray::{Array2, Array3, ArrayD, ArrayView2, Axis, Ix2};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dense 8-bit pixel grid laid out as `(height, width, channels)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    data: Array3<u8>,
    origin: Option<String>,
}

impl Raster {
    /// Wrap an `(H, W, C)` array; channel count is checked by the preprocessor
    #[must_use]
    pub fn new(data: Array3<u8>) -> Self {
        Self { data, origin: None }
    }

    /// Grayscale `(H, W)` array gets a trailing channel axis
    #[must_use]
    pub fn from_gray(data: Array2<u8>) -> Self {
        Self::new(data.insert_axis(Axis(2)))
    }

    /// Build a raster of `width x height` filled with one RGB color
    #[must_use]
    pub fn solid_rgb(width: usize, height: usize, rgb: [u8; 3]) -> Self {
        let data = Array3::from_shape_fn((height, width, 3), |(_, _, c)| rgb[c]);
        Self::new(data)
    }

    /// Convert a decoded image, keeping 1, 3 or 4 channels
    ///
    /// 16-bit and floating point images are reduced to 8 bits, grayscale with
    /// alpha becomes RGBA.
    ///
    /// # Errors
    /// - Image buffer does not match its declared dimensions
    pub fn from_dynamic(image: DynamicImage) -> Result<Self> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let (channels, raw) = match image {
            DynamicImage::ImageLuma8(buf) => (1, buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (3, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (4, buf.into_raw()),
            other @ DynamicImage::ImageLuma16(_) => (1, other.to_luma8().into_raw()),
            other if other.color().has_alpha() => (4, other.to_rgba8().into_raw()),
            other => (3, other.to_rgb8().into_raw()),
        };

        let data = Array3::from_shape_vec((height, width, channels), raw).map_err(|e| {
            BgRemovalError::decode(format!(
                "Decoded buffer does not match {width}x{height}x{channels}: {e}"
            ))
        })?;
        Ok(Self::new(data))
    }

    /// Attach the path or URL the raster was loaded from
    #[must_use]
    pub fn with_origin<S: Into<String>>(mut self, origin: S) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Normalize to exactly three channels: grayscale is replicated, alpha is dropped
    ///
    /// # Errors
    /// - Channel count other than 1, 3 or 4
    pub fn into_rgb(self) -> Result<Self> {
        let (height, width, channels) = self.data.dim();
        let data = match channels {
            3 => self.data,
            1 | 4 => Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
                let source_channel = if channels == 1 { 0 } else { c };
                self.data[[y, x, source_channel]]
            }),
            other => {
                return Err(BgRemovalError::shape(format!(
                    "Unsupported channel count {other}, expected 1, 3 or 4"
                )))
            },
        };
        Ok(Self {
            data,
            origin: self.origin,
        })
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// `(height, width)`
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    #[must_use]
    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Array3<u8> {
        self.data
    }
}

/// Raw single-channel model output at the model's native resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMap {
    values: Array2<f32>,
}

impl ProbabilityMap {
    #[must_use]
    pub fn new(values: Array2<f32>) -> Self {
        Self { values }
    }

    /// Squeeze an engine output shaped `(1, 1, H, W)`, `(1, H, W)` or `(H, W)`
    ///
    /// # Errors
    /// - Any other rank, or a leading axis larger than one
    pub fn from_output(output: ArrayD<f32>) -> Result<Self> {
        let shape = output.shape().to_vec();
        let mut squeezed = output;
        while squeezed.ndim() > 2 {
            if squeezed.shape().first().copied() != Some(1) {
                return Err(BgRemovalError::inference(format!(
                    "Expected a single-channel output map, got shape {shape:?}"
                )));
            }
            squeezed = squeezed.index_axis_move(Axis(0), 0);
        }

        let values = squeezed.into_dimensionality::<Ix2>().map_err(|e| {
            BgRemovalError::inference(format!("Unexpected output shape {shape:?}: {e}"))
        })?;
        Ok(Self::new(values))
    }

    #[must_use]
    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// `(height, width)`
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        self.values.dim()
    }
}

/// 8-bit alpha mask at the original image resolution, laid out as `(H, W, 1)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    data: Array3<u8>,
}

impl Mask {
    /// Wrap an `(H, W, 1)` array
    ///
    /// # Errors
    /// - Trailing axis is not a single channel
    pub fn new(data: Array3<u8>) -> Result<Self> {
        let channels = data.dim().2;
        if channels != 1 {
            return Err(BgRemovalError::shape(format!(
                "Mask must have a single channel, got {channels}"
            )));
        }
        Ok(Self { data })
    }

    #[must_use]
    pub fn from_gray(data: Array2<u8>) -> Self {
        Self {
            data: data.insert_axis(Axis(2)),
        }
    }

    /// Uniform mask of the given size
    #[must_use]
    pub fn filled(height: usize, width: usize, value: u8) -> Self {
        Self::from_gray(Array2::from_elem((height, width), value))
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    /// `(height, width)`
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// Two-dimensional view without the channel axis
    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, u8> {
        self.data.index_axis(Axis(2), 0)
    }

    #[must_use]
    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    /// Convert to a grayscale image
    ///
    /// # Errors
    /// - Dimensions exceed `u32`
    pub fn to_image(&self) -> Result<GrayImage> {
        let (height, width) = self.dimensions();
        let raw: Vec<u8> = self.view().iter().copied().collect();
        GrayImage::from_raw(width as u32, height as u32, raw)
            .ok_or_else(|| BgRemovalError::internal("Failed to create image from mask data"))
    }

    /// Save the mask as a grayscale PNG
    ///
    /// # Errors
    /// - Encoding or file write failure
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_image()?
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }

    /// Foreground/background pixel counts, foreground meaning intensity above 127
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let foreground_pixels = self.data.iter().filter(|&&v| v > 127).count();
        let background_pixels = total_pixels - foreground_pixels;
        let ratio = |count: usize| {
            if total_pixels == 0 {
                0.0
            } else {
                count as f32 / total_pixels as f32
            }
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels,
            foreground_ratio: ratio(foreground_pixels),
            background_ratio: ratio(background_pixels),
        }
    }
}

/// A 4-connected region of above-threshold mask pixels
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledComponent {
    /// Label id, starting at 1 (0 is background)
    pub label: u32,
    /// Pixel count
    pub area: usize,
    /// Mean `(x, y)` position of the region's pixels
    pub centroid: (f64, f64),
}

/// RGB raster with the mask as alpha channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeImage {
    image: RgbaImage,
}

impl CompositeImage {
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Encode as PNG bytes
    ///
    /// # Errors
    /// - PNG encoder failure
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        crate::services::format::Compositor::encode_png(&self.image)
    }

    /// Encode as PNG and write to `path`
    ///
    /// # Errors
    /// - PNG encoder failure
    /// - File write failure
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let bytes = self.encode_png()?;
        std::fs::write(path_ref, bytes)
            .map_err(|e| BgRemovalError::file_io_error("write PNG", path_ref, &e))
    }
}

/// Statistics about a mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    pub foreground_ratio: f32,
    pub background_ratio: f32,
}

/// Per-stage timing breakdown of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Image fetch and decode (zero when starting from a raster)
    pub image_decode_ms: u64,
    /// Resize, quantize and normalize
    pub preprocessing_ms: u64,
    /// Inference engine call
    pub inference_ms: u64,
    /// Rescale and min-max normalize the output map
    pub postprocessing_ms: u64,
    /// Connected-component filtering
    pub filtering_ms: u64,
    /// Alpha compositing
    pub compositing_ms: u64,
    /// End to end
    pub total_ms: u64,
}

impl ProcessingTimings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of the total spent in inference
    #[must_use]
    pub fn inference_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            0.0
        } else {
            self.inference_ms as f64 / self.total_ms as f64
        }
    }

    /// Time not attributed to any stage
    #[must_use]
    pub fn other_overhead_ms(&self) -> u64 {
        let measured = self.image_decode_ms
            + self.preprocessing_ms
            + self.inference_ms
            + self.postprocessing_ms
            + self.filtering_ms
            + self.compositing_ms;
        self.total_ms.saturating_sub(measured)
    }

    /// One-line summary for logs
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Total: {}ms | Decode: {}ms | Preprocess: {}ms | Inference: {}ms | Postprocess: {}ms | Filter: {}ms | Composite: {}ms",
            self.total_ms,
            self.image_decode_ms,
            self.preprocessing_ms,
            self.inference_ms,
            self.postprocessing_ms,
            self.filtering_ms,
            self.compositing_ms
        )
    }
}

/// Output of one pipeline run
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// RGBA result
    pub composite: CompositeImage,
    /// Filtered alpha mask
    pub mask: Mask,
    /// Original `(height, width)`
    pub original_dimensions: (usize, usize),
    pub timings: ProcessingTimings,
    pub statistics: MaskStatistics,
    /// Path or URL of the input, when known
    pub origin: Option<String>,
}

impl RemovalResult {
    /// Encode the composite as PNG bytes
    ///
    /// # Errors
    /// - PNG encoder failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        self.composite.encode_png()
    }

    /// Write the composite as PNG
    ///
    /// # Errors
    /// - PNG encoder or file write failure
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.composite.save_png(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, LumaA, Rgb, Rgba};
    use ndarray::{array, IxDyn};

    #[test]
    fn test_from_gray_adds_channel_axis() {
        let raster = Raster::from_gray(Array2::from_elem((4, 6), 7));
        assert_eq!(raster.dimensions(), (4, 6));
        assert_eq!(raster.channels(), 1);
    }

    #[test]
    fn test_into_rgb_replicates_gray_and_drops_alpha() {
        let gray = Raster::from_gray(array![[10, 20], [30, 40]]).into_rgb().unwrap();
        assert_eq!(gray.channels(), 3);
        assert_eq!(gray.data()[[1, 0, 0]], 30);
        assert_eq!(gray.data()[[1, 0, 2]], 30);

        let rgba = Raster::new(Array3::from_shape_fn((2, 2, 4), |(_, _, c)| c as u8 * 10))
            .into_rgb()
            .unwrap();
        assert_eq!(rgba.channels(), 3);
        assert_eq!(rgba.data()[[0, 1, 2]], 20);

        let two = Raster::new(Array3::zeros((2, 2, 2)));
        assert!(matches!(two.into_rgb(), Err(BgRemovalError::Shape(_))));
    }

    #[test]
    fn test_from_dynamic_keeps_channel_order() {
        let mut rgb = ImageBuffer::<Rgb<u8>, Vec<u8>>::new(3, 2);
        rgb.put_pixel(2, 1, Rgb([1, 2, 3]));
        let raster = Raster::from_dynamic(DynamicImage::ImageRgb8(rgb)).unwrap();
        assert_eq!(raster.dimensions(), (2, 3));
        assert_eq!(raster.data()[[1, 2, 0]], 1);
        assert_eq!(raster.data()[[1, 2, 2]], 3);
    }

    #[test]
    fn test_from_dynamic_converts_gray_alpha() {
        let la = ImageBuffer::<LumaA<u8>, Vec<u8>>::from_pixel(2, 2, LumaA([90, 128]));
        let raster = Raster::from_dynamic(DynamicImage::ImageLumaA8(la)).unwrap();
        assert_eq!(raster.channels(), 4);
        assert_eq!(raster.data()[[0, 0, 1]], 90);
        assert_eq!(raster.data()[[0, 0, 3]], 128);
    }

    #[test]
    fn test_probability_map_squeezes_output() {
        let four = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 5, 7]));
        assert_eq!(ProbabilityMap::from_output(four).unwrap().dimensions(), (5, 7));

        let three = ArrayD::<f32>::zeros(IxDyn(&[1, 5, 7]));
        assert_eq!(ProbabilityMap::from_output(three).unwrap().dimensions(), (5, 7));

        let two = ArrayD::<f32>::zeros(IxDyn(&[5, 7]));
        assert_eq!(ProbabilityMap::from_output(two).unwrap().dimensions(), (5, 7));
    }

    #[test]
    fn test_probability_map_rejects_multichannel() {
        let multi = ArrayD::<f32>::zeros(IxDyn(&[1, 2, 5, 7]));
        assert!(matches!(
            ProbabilityMap::from_output(multi),
            Err(BgRemovalError::Inference(_))
        ));

        let flat = ArrayD::<f32>::zeros(IxDyn(&[35]));
        assert!(ProbabilityMap::from_output(flat).is_err());
    }

    #[test]
    fn test_mask_requires_single_channel() {
        assert!(Mask::new(Array3::zeros((3, 3, 1))).is_ok());
        assert!(matches!(
            Mask::new(Array3::zeros((3, 3, 2))),
            Err(BgRemovalError::Shape(_))
        ));
    }

    #[test]
    fn test_mask_statistics() {
        let mask = Mask::from_gray(array![[0, 255], [200, 100]]);
        let stats = mask.statistics();
        assert_eq!(stats.total_pixels, 4);
        assert_eq!(stats.foreground_pixels, 2);
        assert_eq!(stats.background_pixels, 2);
        assert!((stats.foreground_ratio - 0.5).abs() < f32::EPSILON);

        let empty = Mask::filled(0, 0, 0).statistics();
        assert_eq!(empty.foreground_ratio, 0.0);
    }

    #[test]
    fn test_mask_to_image_layout() {
        let mask = Mask::from_gray(array![[1, 2, 3], [4, 5, 6]]);
        let image = mask.to_image().unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1)[0], 6);
    }

    #[test]
    fn test_timings_overhead() {
        let timings = ProcessingTimings {
            image_decode_ms: 5,
            preprocessing_ms: 10,
            inference_ms: 50,
            postprocessing_ms: 10,
            filtering_ms: 10,
            compositing_ms: 5,
            total_ms: 100,
        };
        assert_eq!(timings.other_overhead_ms(), 10);
        assert!((timings.inference_ratio() - 0.5).abs() < f64::EPSILON);
        assert!(timings.summary().starts_with("Total: 100ms"));
    }

    #[test]
    fn test_composite_png_round_trip() {
        let composite = CompositeImage::new(RgbaImage::from_pixel(4, 3, Rgba([9, 8, 7, 6])));
        let bytes = composite.encode_png().unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([9, 8, 7, 6]));
    }
}
