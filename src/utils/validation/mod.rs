//! Validation helpers shared by the pipeline stages

pub mod tensor;

pub use tensor::TensorValidator;
