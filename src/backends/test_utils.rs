//! Mock inference backend for unit tests
//!
//! Produces deterministic output maps at the input tensor's spatial size so
//! pipeline behavior can be tested without a model file.

use crate::{
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    types::ProbabilityMap,
};
use ndarray::{Array4, Axis};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Output pattern of a [`MockBackend`]
#[derive(Debug, Clone)]
pub enum MockOutput {
    /// 1.0 everywhere except the top-left pixel, which is 0.0
    Foreground,
    /// Soft disk centered in the frame, fading to 0 at a third of the short side
    Disk,
    /// The same value everywhere
    Constant(f32),
    /// Every call fails with an inference error carrying this message
    Fail(String),
}

/// Deterministic [`InferenceBackend`] for tests
#[derive(Debug)]
pub struct MockBackend {
    output: MockOutput,
    calls: AtomicUsize,
}

impl MockBackend {
    #[must_use]
    pub fn new(output: MockOutput) -> Self {
        Self {
            output,
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn constant_foreground() -> Self {
        Self::new(MockOutput::Foreground)
    }

    #[must_use]
    pub fn disk() -> Self {
        Self::new(MockOutput::Disk)
    }

    #[must_use]
    pub fn flat(value: f32) -> Self {
        Self::new(MockOutput::Constant(value))
    }

    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self::new(MockOutput::Fail(message.to_string()))
    }

    /// Number of `infer` calls so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn generate(&self, height: usize, width: usize) -> Result<Array4<f32>> {
        let map = match &self.output {
            MockOutput::Foreground => Array4::from_shape_fn((1, 1, height, width), |(_, _, y, x)| {
                if y == 0 && x == 0 {
                    0.0
                } else {
                    1.0
                }
            }),
            MockOutput::Disk => {
                let center_y = height as f32 / 2.0;
                let center_x = width as f32 / 2.0;
                let radius = (height.min(width) as f32 / 3.0).max(1.0);
                Array4::from_shape_fn((1, 1, height, width), |(_, _, y, x)| {
                    let dy = y as f32 - center_y;
                    let dx = x as f32 - center_x;
                    let distance = (dx * dx + dy * dy).sqrt();
                    ((radius - distance) / radius).clamp(0.0, 1.0)
                })
            },
            MockOutput::Constant(value) => Array4::from_elem((1, 1, height, width), *value),
            MockOutput::Fail(message) => return Err(BgRemovalError::inference(message.clone())),
        };
        Ok(map)
    }
}

impl InferenceBackend for MockBackend {
    fn infer(&self, input: &Array4<f32>) -> Result<ProbabilityMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (_, _, height, width) = input.dim();
        let output = self.generate(height, width)?;
        ProbabilityMap::from_output(output.into_dyn())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[test]
fn test_mock_patterns() {
    let input = Array4::<f32>::zeros((1, 3, 9, 12));

    let map = MockBackend::constant_foreground().infer(&input).unwrap();
    assert_eq!(map.values()[[0, 0]], 0.0);
    assert_eq!(map.values()[[8, 11]], 1.0);

    let disk = MockBackend::disk().infer(&input).unwrap();
    assert!(disk.values()[[4, 6]] > 0.5);
    assert_eq!(disk.values()[[0, 0]], 0.0);
    assert_eq!(disk.values().index_axis(Axis(0), 0).len(), 12);

    let backend = MockBackend::failing("boom");
    assert!(backend.infer(&input).is_err());
    assert_eq!(backend.call_count(), 1);
}
