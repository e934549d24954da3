//! Numeric building blocks of the removal pipeline

pub mod components;
pub mod postprocessing;
pub mod preprocessing;
pub mod providers;
pub mod resample;
pub mod validation;

pub use components::{label_components, ComponentAnalysis, ComponentFilter, StructuringElement};
pub use postprocessing::MaskPostprocessor;
pub use preprocessing::ImagePreprocessor;
pub use providers::{list_all_providers, ProviderInfo, ProviderSelection};
pub use resample::{resize_bilinear_2d, resize_bilinear_chw};
pub use validation::TensorValidator;
