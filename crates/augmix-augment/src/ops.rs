//! The closed catalog of single-image augmentation operations.
//!
//! Every operation takes an image in `[0, 1]` and a [`Severity`], draws its
//! own magnitude from the supplied random stream, and returns an image of the
//! same shape clipped back to `[0, 1]`.
//!
//! Magnitudes follow the AugMix convention: a level `l ~ U(0.1, severity)` is
//! drawn per application, then scaled with `int_parameter(l, max) = ⌊l·max/10⌋`
//! or `float_parameter(l, max) = l·max/10`.

use crate::image::{
    affine_transform, blend, clip_unit, dequantize, grayscale, quantize, smooth, validate_image,
    Image, LEVELS,
};
use crate::{AugmentError, AugmentResult};
use scirs2_core::ndarray::{Array3, ArrayView3, Axis};
use scirs2_core::random::{Rng, StdRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Magnitude control shared by every operation, in `1..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

impl Severity {
    /// Smallest accepted severity.
    pub const MIN: u8 = 1;
    /// Largest accepted severity.
    pub const MAX: u8 = 10;

    /// Create a severity, rejecting values outside `1..=10`.
    pub fn new(level: u8) -> AugmentResult<Self> {
        if !(Self::MIN..=Self::MAX).contains(&level) {
            return Err(AugmentError::ConfigError(format!(
                "severity must be in [{}, {}], got {}",
                Self::MIN,
                Self::MAX,
                level
            )));
        }
        Ok(Self(level))
    }

    /// Raw severity level.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for Severity {
    type Error = AugmentError;

    fn try_from(level: u8) -> AugmentResult<Self> {
        Self::new(level)
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> u8 {
        severity.0
    }
}

/// One augmentation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentationOp {
    /// Per-channel min/max stretch.
    #[serde(rename = "autocontrast")]
    AutoContrast,
    /// Per-channel histogram equalization.
    Equalize,
    /// Reduce the number of bits per channel.
    Posterize,
    /// Rotate about the image centre.
    Rotate,
    /// Invert values above a threshold.
    Solarize,
    /// Horizontal shear.
    ShearX,
    /// Vertical shear.
    ShearY,
    /// Horizontal translation.
    TranslateX,
    /// Vertical translation.
    TranslateY,
    /// Saturation enhancement.
    Color,
    /// Contrast enhancement.
    Contrast,
    /// Brightness enhancement.
    Brightness,
    /// Sharpness enhancement.
    Sharpness,
}

impl AugmentationOp {
    /// Operations that do not overlap the common-corruption benchmark.
    pub const STANDARD: [AugmentationOp; 9] = [
        AugmentationOp::AutoContrast,
        AugmentationOp::Equalize,
        AugmentationOp::Posterize,
        AugmentationOp::Rotate,
        AugmentationOp::Solarize,
        AugmentationOp::ShearX,
        AugmentationOp::ShearY,
        AugmentationOp::TranslateX,
        AugmentationOp::TranslateY,
    ];

    /// Every operation in the catalog.
    pub const ALL: [AugmentationOp; 13] = [
        AugmentationOp::AutoContrast,
        AugmentationOp::Equalize,
        AugmentationOp::Posterize,
        AugmentationOp::Rotate,
        AugmentationOp::Solarize,
        AugmentationOp::ShearX,
        AugmentationOp::ShearY,
        AugmentationOp::TranslateX,
        AugmentationOp::TranslateY,
        AugmentationOp::Color,
        AugmentationOp::Contrast,
        AugmentationOp::Brightness,
        AugmentationOp::Sharpness,
    ];

    /// Canonical identifier.
    pub fn name(self) -> &'static str {
        match self {
            AugmentationOp::AutoContrast => "autocontrast",
            AugmentationOp::Equalize => "equalize",
            AugmentationOp::Posterize => "posterize",
            AugmentationOp::Rotate => "rotate",
            AugmentationOp::Solarize => "solarize",
            AugmentationOp::ShearX => "shear_x",
            AugmentationOp::ShearY => "shear_y",
            AugmentationOp::TranslateX => "translate_x",
            AugmentationOp::TranslateY => "translate_y",
            AugmentationOp::Color => "color",
            AugmentationOp::Contrast => "contrast",
            AugmentationOp::Brightness => "brightness",
            AugmentationOp::Sharpness => "sharpness",
        }
    }

    /// Apply the operation with a freshly sampled magnitude.
    pub fn apply(
        self,
        image: &ArrayView3<f64>,
        severity: Severity,
        rng: &mut StdRng,
    ) -> AugmentResult<Image> {
        validate_image(image)?;

        let mut out = match self {
            AugmentationOp::AutoContrast => autocontrast(image),
            AugmentationOp::Equalize => equalize(image),
            AugmentationOp::Posterize => {
                let level = sample_level(severity, rng);
                let bits = 4 - int_parameter(level, 4.0);
                posterize(image, bits.clamp(0, 8) as u32)
            }
            AugmentationOp::Solarize => {
                let level = sample_level(severity, rng);
                solarize(image, 256 - int_parameter(level, 256.0))
            }
            AugmentationOp::Rotate => {
                let level = sample_level(severity, rng);
                let degrees = int_parameter(level, 30.0) as f64 * random_sign(rng);
                rotate(image, degrees)
            }
            AugmentationOp::ShearX => {
                let level = sample_level(severity, rng);
                let shear = float_parameter(level, 0.3) * random_sign(rng);
                affine_transform(image, [1.0, shear, 0.0, 0.0, 1.0, 0.0])
            }
            AugmentationOp::ShearY => {
                let level = sample_level(severity, rng);
                let shear = float_parameter(level, 0.3) * random_sign(rng);
                affine_transform(image, [1.0, 0.0, 0.0, shear, 1.0, 0.0])
            }
            AugmentationOp::TranslateX => {
                let level = sample_level(severity, rng);
                let limit = image.dim().1 as f64 / 3.0;
                let shift = int_parameter(level, limit) as f64 * random_sign(rng);
                affine_transform(image, [1.0, 0.0, shift, 0.0, 1.0, 0.0])
            }
            AugmentationOp::TranslateY => {
                let level = sample_level(severity, rng);
                let limit = image.dim().0 as f64 / 3.0;
                let shift = int_parameter(level, limit) as f64 * random_sign(rng);
                affine_transform(image, [1.0, 0.0, 0.0, 0.0, 1.0, shift])
            }
            AugmentationOp::Color => {
                let factor = enhance_factor(severity, rng);
                let gray = grayscale(image);
                let degenerate = Array3::from_shape_fn(image.raw_dim(), |(y, x, _)| gray[[y, x]]);
                blend(image, &degenerate.view(), factor)
            }
            AugmentationOp::Contrast => {
                let factor = enhance_factor(severity, rng);
                let mean = grayscale(image).mean().unwrap_or(0.0);
                let degenerate = Array3::from_elem(image.raw_dim(), mean);
                blend(image, &degenerate.view(), factor)
            }
            AugmentationOp::Brightness => {
                let factor = enhance_factor(severity, rng);
                let degenerate = Array3::zeros(image.raw_dim());
                blend(image, &degenerate.view(), factor)
            }
            AugmentationOp::Sharpness => {
                let factor = enhance_factor(severity, rng);
                let degenerate = smooth(image);
                blend(image, &degenerate.view(), factor)
            }
        };

        clip_unit(&mut out);
        Ok(out)
    }
}

impl fmt::Display for AugmentationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AugmentationOp {
    type Err = AugmentError;

    fn from_str(s: &str) -> AugmentResult<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        AugmentationOp::ALL
            .iter()
            .copied()
            .find(|op| op.name() == normalized || op.name().replace('_', "") == normalized)
            .ok_or_else(|| AugmentError::UnknownOperation(s.to_string()))
    }
}

/// The catalog a sampler draws operations from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationSet {
    /// [`AugmentationOp::STANDARD`].
    #[default]
    Standard,
    /// [`AugmentationOp::ALL`].
    All,
    /// An explicit list of operations.
    Custom(Vec<AugmentationOp>),
}

impl OperationSet {
    /// Build a custom catalog from operation identifiers.
    pub fn from_names<I, S>(names: I) -> AugmentResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ops = names
            .into_iter()
            .map(|name| name.as_ref().parse())
            .collect::<AugmentResult<Vec<AugmentationOp>>>()?;
        let set = OperationSet::Custom(ops);
        set.validate()?;
        Ok(set)
    }

    /// Operations in this catalog.
    pub fn operations(&self) -> &[AugmentationOp] {
        match self {
            OperationSet::Standard => &AugmentationOp::STANDARD[..],
            OperationSet::All => &AugmentationOp::ALL[..],
            OperationSet::Custom(ops) => ops.as_slice(),
        }
    }

    /// Reject an empty catalog.
    pub fn validate(&self) -> AugmentResult<()> {
        if self.operations().is_empty() {
            return Err(AugmentError::ConfigError(
                "operation catalog must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn sample_level(severity: Severity, rng: &mut StdRng) -> f64 {
    let high = f64::from(severity.get());
    rng.random_range(0.1..high)
}

fn int_parameter(level: f64, max: f64) -> i64 {
    (level * max / 10.0).floor() as i64
}

fn float_parameter(level: f64, max: f64) -> f64 {
    level * max / 10.0
}

fn enhance_factor(severity: Severity, rng: &mut StdRng) -> f64 {
    float_parameter(sample_level(severity, rng), 1.8) + 0.1
}

fn random_sign(rng: &mut StdRng) -> f64 {
    if rng.random::<f64>() < 0.5 {
        -1.0
    } else {
        1.0
    }
}

fn autocontrast(image: &ArrayView3<f64>) -> Image {
    let mut out = image.to_owned();
    let channels = image.dim().2;

    for ch in 0..channels {
        let plane = image.index_axis(Axis(2), ch);
        let lo = plane.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = plane.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if hi > lo {
            let scale = 1.0 / (hi - lo);
            out.index_axis_mut(Axis(2), ch)
                .mapv_inplace(|v| (v - lo) * scale);
        }
    }

    out
}

fn equalize(image: &ArrayView3<f64>) -> Image {
    let mut out = image.to_owned();
    let channels = image.dim().2;

    for ch in 0..channels {
        let mut histogram = [0usize; LEVELS];
        let plane = image.index_axis(Axis(2), ch);
        for &v in plane.iter() {
            histogram[quantize(v) as usize] += 1;
        }

        let total: usize = histogram.iter().sum();
        let last = histogram.iter().rev().find(|&&c| c > 0).copied().unwrap_or(0);
        let step = (total - last) / (LEVELS - 1);
        if step == 0 {
            continue;
        }

        let mut lut = [0u8; LEVELS];
        let mut n = step / 2;
        for (level, count) in histogram.iter().enumerate() {
            lut[level] = (n / step).min(LEVELS - 1) as u8;
            n += count;
        }

        out.index_axis_mut(Axis(2), ch)
            .mapv_inplace(|v| dequantize(lut[quantize(v) as usize]));
    }

    out
}

fn posterize(image: &ArrayView3<f64>, bits: u32) -> Image {
    let shift = 8 - bits.min(8);
    let mask = !(((1u16 << shift) - 1) as u8);
    image.mapv(|v| dequantize(quantize(v) & mask))
}

fn solarize(image: &ArrayView3<f64>, threshold: i64) -> Image {
    image.mapv(|v| {
        let level = quantize(v);
        if i64::from(level) >= threshold {
            dequantize(255 - level)
        } else {
            v
        }
    })
}

fn rotate(image: &ArrayView3<f64>, degrees: f64) -> Image {
    let (height, width, _) = image.dim();
    let theta = degrees.to_radians();
    let (sin, cos) = theta.sin_cos();
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;

    let (a, b, d, e) = (cos, sin, -sin, cos);
    let c = cx - a * cx - b * cy;
    let f = cy - d * cx - e * cy;
    affine_transform(image, [a, b, c, d, e, f])
}
