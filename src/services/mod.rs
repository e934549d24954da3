//! Service layer around the pipeline core
//!
//! - `io`: image loading from bytes, paths and URLs
//! - `format`: alpha compositing and PNG encoding
//! - `staging`: per-request temporary directories

pub mod format;
pub mod io;
pub mod staging;

pub use format::{Compositor, PNG_CONTENT_TYPE};
pub use io::{ImageLoader, ImageSource};
pub use staging::{RequestStaging, StagedRequest};
