//! Per-batch view generation.

use crate::image::validate_batch;
use crate::sampler::{AugMixSampler, MixtureSpec};
use crate::{AugmentError, AugmentResult};
use scirs2_core::ndarray::{Array4, ArrayView4, Axis};
use scirs2_core::random::StdRng;

/// The clean batch plus two independently augmented copies.
#[derive(Debug, Clone)]
pub struct ViewTriple {
    pub original: Array4<f64>,
    pub view_a: Array4<f64>,
    pub view_b: Array4<f64>,
}

/// Output of [`BatchViewGenerator::generate`].
#[derive(Debug, Clone)]
pub enum BatchViews {
    /// Consistency disabled: the batch as given.
    Single(Array4<f64>),
    /// Consistency enabled: original and two AugMix views.
    Triple(ViewTriple),
}

impl BatchViews {
    /// The unaugmented batch.
    pub fn original(&self) -> &Array4<f64> {
        match self {
            BatchViews::Single(batch) => batch,
            BatchViews::Triple(triple) => &triple.original,
        }
    }

    /// The augmented pair, if present.
    pub fn augmented(&self) -> Option<(&Array4<f64>, &Array4<f64>)> {
        match self {
            BatchViews::Single(_) => None,
            BatchViews::Triple(triple) => Some((&triple.view_a, &triple.view_b)),
        }
    }

    /// Number of images per view.
    pub fn len(&self) -> usize {
        self.original().len_of(Axis(0))
    }

    /// Whether the batch holds no images.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Produces [`BatchViews`] for training batches.
#[derive(Debug, Clone)]
pub struct BatchViewGenerator {
    sampler: Option<AugMixSampler>,
    img_size: Option<usize>,
}

impl BatchViewGenerator {
    /// Create a generator.
    ///
    /// With `use_consistency` a mixture spec with `width ≥ 1` is required.
    /// Without it the mixture is ignored and batches pass through untouched.
    pub fn new(spec: Option<MixtureSpec>, use_consistency: bool) -> AugmentResult<Self> {
        if !use_consistency {
            return Ok(Self {
                sampler: None,
                img_size: None,
            });
        }

        let spec = spec.ok_or_else(|| {
            AugmentError::ConfigError(
                "consistency views require width, severity and alpha".to_string(),
            )
        })?;
        if spec.width == 0 {
            return Err(AugmentError::ConfigError(
                "consistency views require width >= 1".to_string(),
            ));
        }

        Ok(Self {
            sampler: Some(AugMixSampler::new(spec)?),
            img_size: None,
        })
    }

    /// Require every batch to hold `img_size × img_size` images.
    pub fn with_img_size(mut self, img_size: usize) -> Self {
        self.img_size = Some(img_size);
        self
    }

    /// Whether augmented views are produced.
    pub fn uses_consistency(&self) -> bool {
        self.sampler.is_some()
    }

    /// Build the views for one batch.
    ///
    /// Every image gets its own draws for view A and view B.
    pub fn generate(&self, batch: &ArrayView4<f64>, rng: &mut StdRng) -> AugmentResult<BatchViews> {
        validate_batch(batch, self.img_size)?;

        let Some(sampler) = &self.sampler else {
            return Ok(BatchViews::Single(batch.to_owned()));
        };

        let mut view_a = Array4::zeros(batch.raw_dim());
        let mut view_b = Array4::zeros(batch.raw_dim());

        for (i, image) in batch.outer_iter().enumerate() {
            view_a
                .index_axis_mut(Axis(0), i)
                .assign(&sampler.augment(&image, rng)?);
            view_b
                .index_axis_mut(Axis(0), i)
                .assign(&sampler.augment(&image, rng)?);
        }

        Ok(BatchViews::Triple(ViewTriple {
            original: batch.to_owned(),
            view_a,
            view_b,
        }))
    }
}
