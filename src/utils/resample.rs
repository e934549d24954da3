//! Bilinear resampling with half-pixel centers
//!
//! Source coordinates are `scale * (dst + 0.5) - 0.5` clamped at zero, with
//! `scale = in / out`. This is the non corner-aligned convention the
//! segmentation model was trained with, so both the input resize and the
//! output map rescale go through here.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut2, Axis};

/// Interpolation taps for one output coordinate along one axis
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisTap {
    lo: usize,
    hi: usize,
    frac: f32,
}

fn axis_taps(in_len: usize, out_len: usize) -> Vec<AxisTap> {
    let scale = in_len as f32 / out_len as f32;
    let last = in_len.saturating_sub(1);

    (0..out_len)
        .map(|dst| {
            let src = (scale * (dst as f32 + 0.5) - 0.5).max(0.0);
            let lo = (src as usize).min(last);
            let hi = if lo < last { lo + 1 } else { lo };
            AxisTap {
                lo,
                hi,
                frac: src - lo as f32,
            }
        })
        .collect()
}

fn resize_plane_into(
    input: ArrayView2<'_, f32>,
    rows: &[AxisTap],
    cols: &[AxisTap],
    mut output: ArrayViewMut2<'_, f32>,
) {
    for (row_out, row) in output.outer_iter_mut().zip(rows) {
        let top = input.index_axis(Axis(0), row.lo);
        let bottom = input.index_axis(Axis(0), row.hi);
        let row_weight = 1.0 - row.frac;

        for (value, col) in row_out.into_iter().zip(cols) {
            let col_weight = 1.0 - col.frac;
            let upper = col_weight * top[col.lo] + col.frac * top[col.hi];
            let lower = col_weight * bottom[col.lo] + col.frac * bottom[col.hi];
            *value = row_weight * upper + row.frac * lower;
        }
    }
}

/// Resize a single plane to `(out_height, out_width)`
///
/// An empty input or output yields an array of the requested shape filled with zeros.
#[must_use]
pub fn resize_bilinear_2d(
    input: ArrayView2<'_, f32>,
    out_height: usize,
    out_width: usize,
) -> Array2<f32> {
    let mut output = Array2::<f32>::zeros((out_height, out_width));
    let (in_height, in_width) = input.dim();
    if in_height == 0 || in_width == 0 || out_height == 0 || out_width == 0 {
        return output;
    }

    let rows = axis_taps(in_height, out_height);
    let cols = axis_taps(in_width, out_width);
    resize_plane_into(input, &rows, &cols, output.view_mut());
    output
}

/// Resize a channel-first `(C, H, W)` array, channel by channel
#[must_use]
pub fn resize_bilinear_chw(
    input: ArrayView3<'_, f32>,
    out_height: usize,
    out_width: usize,
) -> Array3<f32> {
    let (channels, in_height, in_width) = input.dim();
    let mut output = Array3::<f32>::zeros((channels, out_height, out_width));
    if in_height == 0 || in_width == 0 || out_height == 0 || out_width == 0 {
        return output;
    }

    let rows = axis_taps(in_height, out_height);
    let cols = axis_taps(in_width, out_width);
    for (plane_in, plane_out) in input.outer_iter().zip(output.outer_iter_mut()) {
        resize_plane_into(plane_in, &rows, &cols, plane_out);
    }
    output
}
