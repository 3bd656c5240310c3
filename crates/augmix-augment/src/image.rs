//! Image and batch helpers.
//!
//! Images are `H × W × C` arrays of `f64` values normalized to `[0, 1]`;
//! batches stack images along a leading axis (`N × H × W × C`).

use crate::{AugmentError, AugmentResult};
use scirs2_core::ndarray::{Array2, Array3, Array4, ArrayView3, ArrayView4, Axis};

/// A single image, laid out as height × width × channels.
pub type Image = Array3<f64>;

/// A batch of images, laid out as batch × height × width × channels.
pub type ImageBatch = Array4<f64>;

/// Number of quantization levels used by the histogram-based operations.
pub const LEVELS: usize = 256;

/// ITU-R 601-2 luma weights.
const LUMA: [f64; 3] = [0.299, 0.587, 0.114];

/// Check that an image has a non-empty spatial extent and at least one channel.
pub fn validate_image(image: &ArrayView3<f64>) -> AugmentResult<()> {
    let (height, width, channels) = image.dim();
    if height == 0 || width == 0 || channels == 0 {
        return Err(AugmentError::ShapeError(format!(
            "image must have non-zero extent, got {:?}",
            image.shape()
        )));
    }
    Ok(())
}

/// Check that every image in a batch has the expected square spatial size.
pub fn validate_batch(batch: &ArrayView4<f64>, img_size: Option<usize>) -> AugmentResult<()> {
    let (_, height, width, channels) = batch.dim();
    if height == 0 || width == 0 || channels == 0 {
        return Err(AugmentError::ShapeError(format!(
            "batch images must have non-zero extent, got {:?}",
            batch.shape()
        )));
    }
    if let Some(size) = img_size {
        if height != size || width != size {
            return Err(AugmentError::ShapeError(format!(
                "expected {}x{} images, got {}x{}",
                size, size, height, width
            )));
        }
    }
    Ok(())
}

/// Clamp every value to `[0, 1]`. NaN collapses to 0.
pub fn clip_unit(image: &mut Array3<f64>) {
    image.mapv_inplace(clip_value);
}

#[inline]
pub(crate) fn clip_value(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Whether every value lies in `[0, 1]`.
pub fn is_unit_range(image: &ArrayView3<f64>) -> bool {
    image.iter().all(|&v| (0.0..=1.0).contains(&v))
}

/// Map a `[0, 1]` value to one of 256 levels.
#[inline]
pub(crate) fn quantize(value: f64) -> u8 {
    (clip_value(value) * 255.0).round() as u8
}

#[inline]
pub(crate) fn dequantize(level: u8) -> f64 {
    f64::from(level) / 255.0
}

/// Luminance of every pixel.
///
/// Three or more channels use the first three as RGB; a single channel is
/// returned as-is; two channels are averaged.
pub fn grayscale(image: &ArrayView3<f64>) -> Array2<f64> {
    let channels = image.dim().2;
    if channels >= 3 {
        image.map_axis(Axis(2), |px| {
            LUMA[0] * px[0] + LUMA[1] * px[1] + LUMA[2] * px[2]
        })
    } else {
        image.mean_axis(Axis(2)).unwrap_or_else(|| Array2::zeros((0, 0)))
    }
}

/// Linear interpolation `degenerate + factor · (image − degenerate)`, clipped.
pub(crate) fn blend(image: &ArrayView3<f64>, degenerate: &ArrayView3<f64>, factor: f64) -> Image {
    let mut out = degenerate.to_owned();
    out.zip_mut_with(image, |d, &x| *d = clip_value(*d + factor * (x - *d)));
    out
}

/// Resample `image` through an inverse affine map.
///
/// `coeffs = [a, b, c, d, e, f]` sends the output pixel centre `(x, y)` to the
/// input location `(a·x + b·y + c, d·x + e·y + f)`. Sampling is bilinear and
/// locations outside the image read as zero.
pub(crate) fn affine_transform(image: &ArrayView3<f64>, coeffs: [f64; 6]) -> Image {
    let (height, width, channels) = image.dim();
    let [a, b, c, d, e, f] = coeffs;
    let mut out = Array3::zeros((height, width, channels));

    for y in 0..height {
        for x in 0..width {
            let xo = x as f64 + 0.5;
            let yo = y as f64 + 0.5;
            let sx = a * xo + b * yo + c - 0.5;
            let sy = d * xo + e * yo + f - 0.5;
            for ch in 0..channels {
                out[[y, x, ch]] = clip_value(bilinear(image, sx, sy, ch));
            }
        }
    }

    out
}

fn bilinear(image: &ArrayView3<f64>, sx: f64, sy: f64, ch: usize) -> f64 {
    let (height, width, _) = image.dim();
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;

    let pixel = |xi: f64, yi: f64| -> f64 {
        if xi < 0.0 || yi < 0.0 || xi >= width as f64 || yi >= height as f64 {
            0.0
        } else {
            image[[yi as usize, xi as usize, ch]]
        }
    };

    (1.0 - fx) * (1.0 - fy) * pixel(x0, y0)
        + fx * (1.0 - fy) * pixel(x0 + 1.0, y0)
        + (1.0 - fx) * fy * pixel(x0, y0 + 1.0)
        + fx * fy * pixel(x0 + 1.0, y0 + 1.0)
}

/// 3×3 smoothing with centre weight 5 and unit neighbours; the one-pixel
/// border keeps its original values.
pub(crate) fn smooth(image: &ArrayView3<f64>) -> Image {
    let (height, width, channels) = image.dim();
    let mut out = image.to_owned();
    if height < 3 || width < 3 {
        return out;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            for ch in 0..channels {
                let mut acc = 0.0;
                for dy in 0..3 {
                    for dx in 0..3 {
                        let weight = if dy == 1 && dx == 1 { 5.0 } else { 1.0 };
                        acc += weight * image[[y + dy - 1, x + dx - 1, ch]];
                    }
                }
                out[[y, x, ch]] = acc / 13.0;
            }
        }
    }

    out
}
