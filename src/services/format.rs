//! Compositing and output encoding
//!
//! Merges the RGB raster with the filtered mask as alpha and encodes the
//! result as PNG, the only output format the endpoint serves.

use crate::{
    error::Result,
    types::{CompositeImage, Mask, Raster},
    utils::validation::TensorValidator,
};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;

/// MIME type of encoded composites
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Service combining rasters and masks into RGBA output
pub struct Compositor;

impl Compositor {
    /// Concatenate the raster's RGB channels with the mask as a fourth channel
    ///
    /// Grayscale rasters are replicated and an existing alpha channel is
    /// replaced by the mask.
    ///
    /// # Errors
    /// - `ShapeMismatch` when raster and mask dimensions differ
    /// - `Shape` for unsupported channel counts
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_service::{services::Compositor, types::{Mask, Raster}};
    ///
    /// let raster = Raster::solid_rgb(4, 3, [10, 20, 30]);
    /// let mask = Mask::filled(3, 4, 255);
    /// let composite = Compositor::composite(&raster, &mask).unwrap();
    /// assert_eq!(composite.image().get_pixel(0, 0).0, [10, 20, 30, 255]);
    /// ```
    pub fn composite(raster: &Raster, mask: &Mask) -> Result<CompositeImage> {
        TensorValidator::validate_same_dimensions(
            "Raster and mask dimensions differ",
            raster.dimensions(),
            mask.dimensions(),
        )?;
        let (height, width) = raster.dimensions();
        TensorValidator::validate_raster_shape(height, width, raster.channels())?;

        let data = raster.data();
        let alpha = mask.view();
        let gray = raster.channels() == 1;

        let mut image = RgbaImage::new(width as u32, height as u32);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let (row, col) = (y as usize, x as usize);
            for channel in 0..3 {
                pixel.0[channel] = data[[row, col, if gray { 0 } else { channel }]];
            }
            pixel.0[3] = alpha[[row, col]];
        }

        Ok(CompositeImage::new(image))
    }

    /// Encode an RGBA image as PNG bytes
    ///
    /// # Errors
    /// - PNG encoder failure
    pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BgRemovalError;
    use ndarray::{array, Array3};

    #[test]
    fn test_composite_copies_rgb_and_alpha() {
        let raster = Raster::new(Array3::from_shape_fn((2, 3, 3), |(y, x, c)| {
            (y * 100 + x * 10 + c) as u8
        }));
        let mask = Mask::from_gray(array![[0, 50, 100], [150, 200, 255]]);

        let composite = Compositor::composite(&raster, &mask).unwrap();
        let image = composite.image();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1).0, [120, 121, 122, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [10, 11, 12, 50]);
    }

    #[test]
    fn test_composite_replaces_existing_alpha() {
        let raster = Raster::new(Array3::from_elem((2, 2, 4), 9));
        let mask = Mask::filled(2, 2, 77);
        let composite = Compositor::composite(&raster, &mask).unwrap();
        assert!(composite.image().pixels().all(|p| p.0 == [9, 9, 9, 77]));
    }

    #[test]
    fn test_composite_dimension_mismatch() {
        let raster = Raster::solid_rgb(4, 4, [0, 0, 0]);
        let mask = Mask::filled(4, 5, 255);
        let err = Compositor::composite(&raster, &mask).unwrap_err();
        assert!(matches!(err, BgRemovalError::ShapeMismatch(_)));
    }

    #[test]
    fn test_encode_png_signature() {
        let bytes = Compositor::encode_png(&RgbaImage::new(2, 2)).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }
}
