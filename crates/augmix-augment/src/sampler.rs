//! AugMix chain sampling and mixing.

use crate::distributions::{sample_beta, sample_dirichlet};
use crate::image::{clip_unit, validate_image, Image};
use crate::ops::{AugmentationOp, OperationSet, Severity};
use crate::{AugmentError, AugmentResult};
use scirs2_core::ndarray::{Array3, ArrayView3};
use scirs2_core::random::StdRng;
use serde::{Deserialize, Serialize};

/// Number of operations per chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthPolicy {
    /// Every chain has exactly this many operations (1..=3).
    Fixed(u8),
    /// Each chain draws its depth uniformly from 1..=3.
    #[default]
    Random,
}

impl DepthPolicy {
    /// Longest chain allowed.
    pub const MAX_DEPTH: u8 = 3;

    /// Map the `depth` option: `-1` is random, `1..=3` is fixed.
    pub fn from_config(depth: i32) -> AugmentResult<Self> {
        match depth {
            -1 => Ok(DepthPolicy::Random),
            1..=3 => Ok(DepthPolicy::Fixed(depth as u8)),
            other => Err(AugmentError::ConfigError(format!(
                "depth must be -1 or in [1, {}], got {}",
                Self::MAX_DEPTH,
                other
            ))),
        }
    }

    fn validate(self) -> AugmentResult<()> {
        match self {
            DepthPolicy::Fixed(d) if d == 0 || d > Self::MAX_DEPTH => Err(
                AugmentError::ConfigError(format!("fixed depth must be in [1, 3], got {}", d)),
            ),
            _ => Ok(()),
        }
    }

    fn draw(self, rng: &mut StdRng) -> usize {
        match self {
            DepthPolicy::Fixed(d) => d as usize,
            DepthPolicy::Random => rng.random_range(1..=Self::MAX_DEPTH as usize),
        }
    }
}

/// Parameters of the AugMix mixing process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureSpec {
    /// Number of parallel chains.
    pub width: usize,
    /// Chain depth policy.
    pub depth: DepthPolicy,
    /// Dirichlet and Beta concentration.
    pub alpha: f64,
    /// Severity handed to every operation.
    pub severity: Severity,
    /// Operations the chains draw from.
    pub operations: OperationSet,
}

impl Default for MixtureSpec {
    fn default() -> Self {
        Self {
            width: 3,
            depth: DepthPolicy::Random,
            alpha: 1.0,
            severity: Severity::default(),
            operations: OperationSet::Standard,
        }
    }
}

impl MixtureSpec {
    /// Create a validated spec using the standard operation catalog.
    pub fn new(width: usize, depth: DepthPolicy, alpha: f64, severity: Severity) -> AugmentResult<Self> {
        let spec = Self {
            width,
            depth,
            alpha,
            severity,
            operations: OperationSet::Standard,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Replace the operation catalog.
    pub fn with_operations(mut self, operations: OperationSet) -> AugmentResult<Self> {
        operations.validate()?;
        self.operations = operations;
        Ok(self)
    }

    /// Check every parameter.
    pub fn validate(&self) -> AugmentResult<()> {
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(AugmentError::ConfigError(format!(
                "alpha must be positive and finite, got {}",
                self.alpha
            )));
        }
        self.depth.validate()?;
        self.operations.validate()
    }
}

/// Result of one AugMix draw.
#[derive(Debug, Clone)]
pub struct MixedImage {
    /// Final image, `blend · original + (1 − blend) · mix`.
    pub image: Image,
    /// Dirichlet weights over chains.
    pub weights: Vec<f64>,
    /// Beta-distributed weight of the original image.
    pub blend: f64,
    /// Operations applied by each chain, in order.
    pub chains: Vec<Vec<AugmentationOp>>,
}

/// Draws AugMix views of single images.
///
/// The sampler is immutable; all randomness comes from the caller's stream,
/// so one sampler can be shared by workers that each own an RNG.
#[derive(Debug, Clone)]
pub struct AugMixSampler {
    spec: MixtureSpec,
}

impl AugMixSampler {
    /// Create a sampler from a spec.
    pub fn new(spec: MixtureSpec) -> AugmentResult<Self> {
        spec.validate()?;
        Ok(Self { spec })
    }

    /// Mixing parameters.
    pub fn spec(&self) -> &MixtureSpec {
        &self.spec
    }

    /// Sample `width` chains, mix their outputs and blend with the original.
    pub fn sample_chain(
        &self,
        image: &ArrayView3<f64>,
        rng: &mut StdRng,
    ) -> AugmentResult<MixedImage> {
        validate_image(image)?;

        if self.spec.width == 0 {
            return Ok(MixedImage {
                image: image.to_owned(),
                weights: Vec::new(),
                blend: 1.0,
                chains: Vec::new(),
            });
        }

        let weights = sample_dirichlet(self.spec.alpha, self.spec.width, rng)?;
        let blend = sample_beta(self.spec.alpha, self.spec.alpha, rng)?;

        let ops = self.spec.operations.operations();
        let mut mix = Array3::<f64>::zeros(image.raw_dim());
        let mut chains = Vec::with_capacity(self.spec.width);

        for &weight in &weights {
            let depth = self.spec.depth.draw(rng);
            let mut chain = Vec::with_capacity(depth);
            let mut branch = image.to_owned();

            for _ in 0..depth {
                let op = ops[rng.random_range(0..ops.len())];
                branch = op.apply(&branch.view(), self.spec.severity, rng)?;
                chain.push(op);
            }

            mix.scaled_add(weight, &branch);
            chains.push(chain);
        }

        let mut mixed = image.mapv(|x| blend * x);
        mixed.scaled_add(1.0 - blend, &mix);
        clip_unit(&mut mixed);

        Ok(MixedImage {
            image: mixed,
            weights,
            blend,
            chains,
        })
    }

    /// Sample a mixed image and drop the draw details.
    pub fn augment(&self, image: &ArrayView3<f64>, rng: &mut StdRng) -> AugmentResult<Image> {
        self.sample_chain(image, rng).map(|mixed| mixed.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::is_unit_range;
    use approx::assert_abs_diff_eq;
    use scirs2_core::random::SeedableRng;

    fn create_test_rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn checker(size: usize) -> Image {
        Array3::from_shape_fn((size, size, 3), |(y, x, c)| {
            if (x + y + c) % 2 == 0 {
                0.9
            } else {
                0.1
            }
        })
    }

    #[test]
    fn test_depth_policy_from_config() {
        assert_eq!(DepthPolicy::from_config(-1).unwrap(), DepthPolicy::Random);
        assert_eq!(DepthPolicy::from_config(2).unwrap(), DepthPolicy::Fixed(2));
        assert!(DepthPolicy::from_config(0).is_err());
        assert!(DepthPolicy::from_config(4).is_err());
        assert!(DepthPolicy::from_config(-2).is_err());
    }

    #[test]
    fn test_spec_rejects_bad_alpha() {
        let severity = Severity::default();
        assert!(MixtureSpec::new(3, DepthPolicy::Random, 0.0, severity).is_err());
        assert!(MixtureSpec::new(3, DepthPolicy::Random, -1.0, severity).is_err());
        assert!(MixtureSpec::new(3, DepthPolicy::Random, f64::INFINITY, severity).is_err());
        assert!(MixtureSpec::new(3, DepthPolicy::Fixed(5), 1.0, severity).is_err());
    }

    #[test]
    fn test_spec_rejects_empty_catalog() {
        let spec = MixtureSpec::default();
        assert!(spec.with_operations(OperationSet::Custom(Vec::new())).is_err());
    }

    #[test]
    fn test_sample_chain_invariants() {
        let mut rng = create_test_rng();
        let image = checker(8);

        for width in 1..5 {
            for depth in [DepthPolicy::Fixed(1), DepthPolicy::Fixed(3), DepthPolicy::Random] {
                let spec = MixtureSpec::new(width, depth, 1.0, Severity::default())
                    .unwrap()
                    .with_operations(OperationSet::All)
                    .unwrap();
                let sampler = AugMixSampler::new(spec).unwrap();
                let mixed = sampler.sample_chain(&image.view(), &mut rng).unwrap();

                assert_eq!(mixed.image.shape(), image.shape());
                assert!(is_unit_range(&mixed.image.view()));
                assert_eq!(mixed.weights.len(), width);
                assert!(mixed.weights.iter().all(|&w| w >= 0.0));
                assert_abs_diff_eq!(mixed.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
                assert!((0.0..=1.0).contains(&mixed.blend));
                assert_eq!(mixed.chains.len(), width);
                for chain in &mixed.chains {
                    assert!((1..=3).contains(&chain.len()));
                    if let DepthPolicy::Fixed(d) = depth {
                        assert_eq!(chain.len(), d as usize);
                    }
                }
            }
        }
    }

    #[test]
    fn test_width_zero_returns_original() {
        let mut rng = create_test_rng();
        let image = checker(4);
        let spec = MixtureSpec::new(0, DepthPolicy::Random, 1.0, Severity::default()).unwrap();
        let sampler = AugMixSampler::new(spec).unwrap();
        let mixed = sampler.sample_chain(&image.view(), &mut rng).unwrap();

        assert_eq!(mixed.image, image);
        assert!(mixed.weights.is_empty());
        assert_eq!(mixed.blend, 1.0);
    }

    #[test]
    fn test_chains_draw_from_catalog() {
        let mut rng = create_test_rng();
        let spec = MixtureSpec::default()
            .with_operations(OperationSet::Custom(vec![AugmentationOp::Rotate]))
            .unwrap();
        let sampler = AugMixSampler::new(spec).unwrap();
        let mixed = sampler.sample_chain(&checker(6).view(), &mut rng).unwrap();

        assert!(mixed
            .chains
            .iter()
            .flatten()
            .all(|&op| op == AugmentationOp::Rotate));
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let spec = MixtureSpec::default();
        let sampler = AugMixSampler::new(spec).unwrap();
        let image = checker(8);

        let a = sampler.augment(&image.view(), &mut create_test_rng()).unwrap();
        let b = sampler.augment(&image.view(), &mut create_test_rng()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_empty_image() {
        let mut rng = create_test_rng();
        let sampler = AugMixSampler::new(MixtureSpec::default()).unwrap();
        let empty = Array3::<f64>::zeros((0, 0, 3));
        assert!(sampler.sample_chain(&empty.view(), &mut rng).is_err());
    }
}
