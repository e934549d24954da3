//! Connected-component mask cleanup
//!
//! Small blobs the model emits away from the subject are removed by labeling
//! the binarized mask, keeping only components larger than a
//! resolution-scaled area limit, and masking the original soft alpha with a
//! dilated union of the kept components.

use crate::{
    config::PipelineConfig,
    types::{LabeledComponent, Mask},
};
use ndarray::{Array2, ArrayView2, Zip};
use std::collections::VecDeque;

/// Row-wise description of a symmetric structuring element
///
/// `half_widths[i]` is the horizontal reach of row `i - radius`; `None`
/// marks an empty row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    radius: usize,
    half_widths: Vec<Option<usize>>,
}

impl StructuringElement {
    /// Ellipse inscribed in a `size x size` box, rasterized like `OpenCV`'s `MORPH_ELLIPSE`
    #[must_use]
    pub fn ellipse(size: usize) -> Self {
        let radius = size / 2;
        let half_widths = (0..size)
            .map(|row| {
                let dy = row.abs_diff(radius);
                if radius == 0 {
                    return Some(0);
                }
                if dy > radius {
                    return None;
                }
                let r2 = (radius * radius) as f64;
                let reach = radius as f64 * ((r2 - (dy * dy) as f64) / r2).sqrt();
                Some((reach.round() as usize).min(radius))
            })
            .collect();
        Self {
            radius,
            half_widths,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.half_widths.len()
    }

    /// Horizontal reach per row, top to bottom
    #[must_use]
    pub fn half_widths(&self) -> &[Option<usize>] {
        &self.half_widths
    }

    /// Kernel as a 0/1 grid, for inspection
    #[must_use]
    pub fn to_grid(&self) -> Array2<u8> {
        let size = self.size();
        Array2::from_shape_fn((size, size), |(row, col)| {
            match self.half_widths.get(row).copied().flatten() {
                Some(reach) if col.abs_diff(self.radius) <= reach => 1,
                _ => 0,
            }
        })
    }

    /// One binary dilation pass; pixels outside the image never contribute
    #[must_use]
    pub fn dilate(&self, source: ArrayView2<'_, bool>) -> Array2<bool> {
        let (height, width) = source.dim();
        let mut output = Array2::from_elem((height, width), false);
        if height == 0 || width == 0 {
            return output;
        }

        // prefix[y][x] = set pixels in source row y before column x
        let mut prefix = Array2::<u32>::zeros((height, width + 1));
        for (src_row, mut prefix_row) in source.outer_iter().zip(prefix.outer_iter_mut()) {
            let mut running = 0;
            for (x, &set) in src_row.iter().enumerate() {
                running += u32::from(set);
                prefix_row[x + 1] = running;
            }
        }

        for (y, mut out_row) in output.outer_iter_mut().enumerate() {
            for (kernel_row, reach) in self.half_widths.iter().enumerate() {
                let Some(reach) = *reach else { continue };
                let Some(sy) = (y + kernel_row).checked_sub(self.radius) else {
                    continue;
                };
                if sy >= height {
                    continue;
                }
                let prefix_row = prefix.row(sy);
                for (x, out) in out_row.iter_mut().enumerate() {
                    if *out {
                        continue;
                    }
                    let start = x.saturating_sub(reach);
                    let end = (x + reach + 1).min(width);
                    *out = prefix_row[end] > prefix_row[start];
                }
            }
        }
        output
    }
}

/// Labeling result for one mask
#[derive(Debug, Clone)]
pub struct ComponentAnalysis {
    /// Per-pixel label, 0 for background
    pub labels: Array2<u32>,
    /// One entry per foreground component, in label order
    pub components: Vec<LabeledComponent>,
    /// Minimum area a component must exceed to be kept
    pub area_limit: f64,
}

impl ComponentAnalysis {
    /// Components whose area exceeds the limit
    pub fn kept(&self) -> impl Iterator<Item = &LabeledComponent> {
        self.components
            .iter()
            .filter(move |c| c.area as f64 > self.area_limit)
    }
}

/// Removes small connected fragments from a mask while keeping soft edges
#[derive(Debug, Clone)]
pub struct ComponentFilter {
    threshold: u8,
    area_reference: f64,
    reference_size: (usize, usize),
    kernel: StructuringElement,
    iterations: usize,
}

impl Default for ComponentFilter {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

impl ComponentFilter {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            threshold: config.binarize_threshold,
            area_reference: config.area_reference,
            reference_size: config.area_reference_size,
            kernel: StructuringElement::ellipse(config.dilation_kernel_size),
            iterations: config.dilation_iterations,
        }
    }

    #[must_use]
    pub fn kernel(&self) -> &StructuringElement {
        &self.kernel
    }

    /// Area threshold for an image of `height x width`, scaled from the reference resolution
    #[must_use]
    pub fn area_limit(&self, height: usize, width: usize) -> f64 {
        let (ref_h, ref_w) = self.reference_size;
        self.area_reference * (height * width) as f64 / (ref_h * ref_w) as f64
    }

    /// Pixels strictly above the threshold
    #[must_use]
    pub fn binarize(&self, mask: ArrayView2<'_, u8>) -> Array2<bool> {
        mask.mapv(|v| v > self.threshold)
    }

    /// Label 4-connected components of the binarized mask
    #[must_use]
    pub fn analyze(&self, mask: &Mask) -> ComponentAnalysis {
        let (height, width) = mask.dimensions();
        let binary = self.binarize(mask.view());
        let (labels, components) = label_components(binary.view());
        ComponentAnalysis {
            labels,
            components,
            area_limit: self.area_limit(height, width),
        }
    }

    /// Keep only large components, preserving the original soft alpha inside them
    ///
    /// When no component exceeds the area limit the mask is returned unchanged.
    #[must_use]
    pub fn filter(&self, mask: &Mask) -> Mask {
        let analysis = self.analyze(mask);
        let kept: Vec<u32> = analysis.kept().map(|c| c.label).collect();

        tracing::debug!(
            components = analysis.components.len(),
            kept = kept.len(),
            area_limit = analysis.area_limit,
            "Component analysis"
        );

        if kept.is_empty() {
            return mask.clone();
        }

        let mut is_kept = vec![false; analysis.components.len() + 1];
        for label in &kept {
            if let Some(slot) = is_kept.get_mut(*label as usize) {
                *slot = true;
            }
        }
        let mut keep = analysis
            .labels
            .mapv(|label| is_kept.get(label as usize).copied().unwrap_or(false));

        for _ in 0..self.iterations {
            keep = self.kernel.dilate(keep.view());
        }

        let mut filtered = mask.view().to_owned();
        Zip::from(&mut filtered).and(&keep).for_each(|alpha, &inside| {
            if !inside {
                *alpha = 0;
            }
        });
        Mask::from_gray(filtered)
    }
}

/// Breadth-first 4-connected labeling; labels start at 1
#[must_use]
pub fn label_components(binary: ArrayView2<'_, bool>) -> (Array2<u32>, Vec<LabeledComponent>) {
    let (height, width) = binary.dim();
    let mut labels = Array2::<u32>::zeros((height, width));
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for ((y, x), &set) in binary.indexed_iter() {
        if !set || labels[[y, x]] != 0 {
            continue;
        }

        let label = components.len() as u32 + 1;
        labels[[y, x]] = label;
        queue.push_back((y, x));

        let mut area = 0_usize;
        let (mut sum_x, mut sum_y) = (0_f64, 0_f64);

        while let Some((cy, cx)) = queue.pop_front() {
            area += 1;
            sum_x += cx as f64;
            sum_y += cy as f64;

            let neighbors = [
                cy.checked_sub(1).map(|ny| (ny, cx)),
                (cy + 1 < height).then_some((cy + 1, cx)),
                cx.checked_sub(1).map(|nx| (cy, nx)),
                (cx + 1 < width).then_some((cy, cx + 1)),
            ];
            for (ny, nx) in neighbors.into_iter().flatten() {
                if binary[[ny, nx]] && labels[[ny, nx]] == 0 {
                    labels[[ny, nx]] = label;
                    queue.push_back((ny, nx));
                }
            }
        }

        components.push(LabeledComponent {
            label,
            area,
            centroid: (sum_x / area as f64, sum_y / area as f64),
        });
    }

    (labels, components)
}
