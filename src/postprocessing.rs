//! Model output to alpha matte
//!
//! The raw `1024x1024` prediction is resized back to the source
//! dimensions with bilinear interpolation, min-max stretched into `0..=255`
//! and written into the alpha channel of the source image.

use crate::config::UniformMaskPolicy;
use crate::error::{MatteError, Result};
use crate::types::SegmentationMask;
use image::{DynamicImage, RgbaImage};
use ndarray::{Array2, Array4, ArrayView2, Axis};

/// Mask produced by [`MaskPostprocessor::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMask {
    pub mask: SegmentationMask,
    /// The prediction had no contrast and [`UniformMaskPolicy`] decided every value
    pub uniform: bool,
}

/// Turns model output into an 8-bit matte and composites it
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskPostprocessor {
    uniform_policy: UniformMaskPolicy,
}

impl MaskPostprocessor {
    #[must_use]
    pub fn new(uniform_policy: UniformMaskPolicy) -> Self {
        Self { uniform_policy }
    }

    #[must_use]
    pub fn uniform_policy(&self) -> UniformMaskPolicy {
        self.uniform_policy
    }

    /// Resize and stretch a `1x1xHxW` model output to a `width x height` matte
    ///
    /// # Errors
    /// - Output is not single batch, single channel
    /// - Target dimensions are zero
    /// - Prediction contains NaN or infinite values
    pub fn process(&self, output: &Array4<f32>, width: u32, height: u32) -> Result<ProcessedMask> {
        let (n, c, _, _) = output.dim();
        if n != 1 || c != 1 {
            return Err(MatteError::inference(format!(
                "Expected a single-channel mask, got output of shape {:?}",
                output.dim()
            )));
        }

        let plane = output.index_axis(Axis(0), 0);
        let plane = plane.index_axis(Axis(0), 0);
        let resized = resize_bilinear(plane, width, height)?;
        let (data, uniform) = stretch_to_u8(resized.iter().copied(), self.uniform_policy)?;

        if uniform {
            log::debug!(
                "Mask has no contrast, applying {:?} policy",
                self.uniform_policy
            );
        }

        Ok(ProcessedMask {
            mask: SegmentationMask::new(data, (width, height)),
            uniform,
        })
    }

    /// Convert `image` to RGBA and overwrite its alpha channel with `mask`
    ///
    /// # Errors
    /// - Mask dimensions differ from the image
    pub fn composite(image: &DynamicImage, mask: &SegmentationMask) -> Result<RgbaImage> {
        let mut rgba = image.to_rgba8();
        mask.apply_to_image(&mut rgba)?;
        Ok(rgba)
    }
}

/// Bilinear resize with pixel centres aligned
///
/// Source coordinates are `(dst + 0.5) * scale - 0.5`, clamped to the edge
/// pixels, so a constant input stays exactly constant.
///
/// # Errors
/// - Empty source or zero target dimensions
pub fn resize_bilinear(src: ArrayView2<'_, f32>, width: u32, height: u32) -> Result<Array2<f32>> {
    let (src_h, src_w) = src.dim();
    if src_h == 0 || src_w == 0 || width == 0 || height == 0 {
        return Err(MatteError::processing_stage_error(
            "mask resize",
            "empty source or target",
            Some(&format!("{src_w}x{src_h} -> {width}x{height}")),
        ));
    }

    let xs = axis_taps(src_w, width as usize);
    let ys = axis_taps(src_h, height as usize);
    let at = |y: usize, x: usize| src.get((y, x)).copied().unwrap_or(0.0);

    Ok(Array2::from_shape_fn(
        (height as usize, width as usize),
        |(dy, dx)| {
            let (y0, y1, fy) = ys.get(dy).copied().unwrap_or((0, 0, 0.0));
            let (x0, x1, fx) = xs.get(dx).copied().unwrap_or((0, 0, 0.0));

            let top = lerp(at(y0, x0), at(y0, x1), fx);
            let bottom = lerp(at(y1, x0), at(y1, x1), fx);
            lerp(top, bottom, fy)
        },
    ))
}

/// Per destination index: left tap, right tap, weight of the right tap
fn axis_taps(src_len: usize, dst_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = src_len as f64 / dst_len as f64;
    let last = src_len - 1;

    (0..dst_len)
        .map(|d| {
            let pos = (d as f64 + 0.5) * scale - 0.5;
            let floor = pos.floor();
            let (i0, frac) = if floor < 0.0 {
                (0, 0.0)
            } else if floor as usize >= last {
                (last, 0.0)
            } else {
                (floor as usize, pos - floor)
            };
            (i0, (i0 + 1).min(last), frac as f32)
        })
        .collect()
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Min-max stretch into `0..=255`
///
/// `(v - min) / (max - min) * 255` is evaluated in `f64` and truncated, so
/// the minimum becomes exactly 0 and the maximum exactly 255. When every
/// value is equal the policy's alpha fills the mask and `true` is returned.
///
/// # Errors
/// - Empty input
/// - NaN or infinite values
#[allow(clippy::float_cmp)]
pub fn stretch_to_u8<I>(values: I, policy: UniformMaskPolicy) -> Result<(Vec<u8>, bool)>
where
    I: IntoIterator<Item = f32>,
    I::IntoIter: Clone,
{
    let values = values.into_iter();
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut count = 0usize;

    for v in values.clone() {
        if !v.is_finite() {
            return Err(MatteError::inference(format!(
                "Model output contains a non-finite value ({v})"
            )));
        }
        min = min.min(v);
        max = max.max(v);
        count += 1;
    }

    if count == 0 {
        return Err(MatteError::processing_stage_error(
            "mask stretch",
            "mask is empty",
            None,
        ));
    }

    if max == min {
        return Ok((vec![policy.alpha(); count], true));
    }

    let min = f64::from(min);
    let range = f64::from(max) - min;
    let data = values
        .map(|v| ((f64::from(v) - min) / range * 255.0) as u8)
        .collect();

    Ok((data, false))
}
