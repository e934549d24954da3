//! End-to-end pipeline properties with a scripted inference backend

mod common;

use bgremove_service::{
    services::ImageLoader,
    types::Raster,
    utils::{ComponentFilter, ImagePreprocessor, MaskPostprocessor},
    BgRemovalError, PipelineConfig, ProbabilityMap,
};
use common::{pipeline, processor, solid_png, Script};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
use ndarray::Array2;

#[test]
fn test_full_size_foreground_keeps_rgb_and_opaque_alpha() {
    let config = PipelineConfig::default();
    let processor = processor(Script::Foreground, &config);
    let raster = Raster::solid_rgb(1800, 1200, [37, 142, 211]);

    let result = processor.process_raster(&raster).unwrap();
    let image = result.composite.image();
    assert_eq!(image.dimensions(), (1800, 1200));
    assert!(image.pixels().all(|p| p.0[..3] == [37, 142, 211]));

    // Min-max normalization pins the map's single minimum to 0; everything else is opaque
    let translucent = image.pixels().filter(|p| p.0[3] < 250).count();
    assert!(translucent <= 1, "{translucent} translucent pixels");
    assert!(result.statistics.foreground_ratio > 0.999);
}

#[test]
fn test_specks_removed_and_square_kept() {
    let config = pipeline(120, 180);
    let script = Script::SquareWithSpecks {
        offset: 10,
        side: 40,
        specks: vec![(100, 160), (5, 170), (110, 20)],
    };
    let result = processor(script, &config)
        .process_raster(&Raster::solid_rgb(180, 120, [200, 200, 200]))
        .unwrap();

    let mask = result.mask.view();
    assert_eq!(mask[[30, 30]], 255);
    assert_eq!(mask[[10, 10]], 255);
    for (y, x) in [(100, 160), (5, 170), (110, 20)] {
        assert_eq!(mask[[y, x]], 0, "speck at ({y}, {x}) survived");
    }
    assert_eq!(result.composite.image().get_pixel(160, 100).0[3], 0);
}

#[test]
fn test_upscaled_output_matches_original_dimensions() {
    // Raster larger than the model input: the mask is upsampled back
    let config = pipeline(30, 45);
    let result = processor(Script::Foreground, &config)
        .process_raster(&Raster::solid_rgb(97, 61, [1, 2, 3]))
        .unwrap();
    assert_eq!(result.mask.dimensions(), (61, 97));
    assert_eq!(result.composite.dimensions(), (97, 61));
}

#[test]
fn test_rgba_input_alpha_is_replaced() {
    let rgba = RgbaImage::from_pixel(24, 16, Rgba([90, 80, 70, 0]));
    let bytes = common::encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png);

    let result = processor(Script::Foreground, &pipeline(16, 24))
        .process_bytes(&bytes)
        .unwrap();
    let pixel = result.composite.image().get_pixel(10, 10);
    assert_eq!(pixel.0, [90, 80, 70, 255]);
}

#[test]
fn test_grayscale_input_is_replicated() {
    let gray = GrayImage::from_pixel(24, 16, Luma([123]));
    let bytes = common::encode(DynamicImage::ImageLuma8(gray), ImageFormat::Png);

    let result = processor(Script::Foreground, &pipeline(16, 24))
        .process_bytes(&bytes)
        .unwrap();
    assert_eq!(
        result.composite.image().get_pixel(5, 5).0[..3],
        [123, 123, 123]
    );
}

#[test]
fn test_png_output_round_trips() {
    let result = processor(Script::Foreground, &pipeline(16, 24))
        .process_bytes(&solid_png(24, 16, [5, 6, 7]))
        .unwrap();
    let png = result.to_png_bytes().unwrap();
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!(decoded.color(), image::ColorType::Rgba8);
    assert_eq!(decoded.to_rgba8().get_pixel(3, 3).0, [5, 6, 7, 255]);
}

#[test]
fn test_non_image_bytes_fail_to_decode() {
    let err = ImageLoader::decode(b"%PDF-1.7 not an image").unwrap_err();
    assert!(matches!(err, BgRemovalError::Decode(_)));
    assert_eq!(err.kind(), "decode");
}

#[test]
fn test_backend_failure_aborts_request() {
    let err = processor(Script::Fail("device lost".to_string()), &pipeline(8, 8))
        .process_bytes(&solid_png(8, 8, [0, 0, 0]))
        .unwrap_err();
    assert!(matches!(err, BgRemovalError::Inference(_)));
}

#[test]
fn test_stages_compose_manually() {
    let config = pipeline(12, 18);
    let raster = Raster::solid_rgb(18, 12, [255, 0, 0]);

    let tensor = ImagePreprocessor::new(&config).prepare(&raster).unwrap();
    assert_eq!(tensor.dim(), (1, 3, 12, 18));
    assert!(tensor.iter().all(|v| (-0.5..=0.5).contains(v)));

    let map = ProbabilityMap::new(Array2::from_shape_fn((12, 18), |(y, _)| y as f32));
    let mask = MaskPostprocessor::new().postprocess(&map, (24, 36)).unwrap();
    assert_eq!(mask.dimensions(), (24, 36));

    let filtered = ComponentFilter::new(&config).filter(&mask);
    assert_eq!(filtered.dimensions(), (24, 36));
}

#[test]
fn test_constant_map_is_degenerate() {
    let map = ProbabilityMap::new(Array2::zeros((12, 18)));
    let err = MaskPostprocessor::new().postprocess(&map, (12, 18)).unwrap_err();
    assert!(matches!(err, BgRemovalError::DegenerateOutput(_)));
}
