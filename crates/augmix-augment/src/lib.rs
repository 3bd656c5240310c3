//! AugMix augmentation for image classifiers.
//!
//! This crate provides:
//! - A closed catalog of single-image operations ([`AugmentationOp`])
//! - Beta and Dirichlet sampling over an explicit [`StdRng`](scirs2_core::random::StdRng)
//! - The AugMix chain sampler ([`AugMixSampler`])
//! - Per-batch view generation for consistency training ([`BatchViewGenerator`])
//! - A bounded, multi-worker prefetch pipeline ([`PrefetchPipeline`])
//!
//! Images are `H × W × C` arrays of `f64` in `[0, 1]`.

mod distributions;
mod error;
mod image;
mod ops;
mod prefetch;
mod sampler;
mod views;

pub use distributions::{sample_beta, sample_dirichlet};
pub use error::{AugmentError, AugmentResult};
pub use image::{clip_unit, grayscale, is_unit_range, validate_batch, validate_image, Image, ImageBatch, LEVELS};
pub use ops::{AugmentationOp, OperationSet, Severity};
pub use prefetch::{worker_seed, PrefetchConfig, PrefetchPipeline, PreparedBatch};
pub use sampler::{AugMixSampler, DepthPolicy, MixedImage, MixtureSpec};
pub use views::{BatchViewGenerator, BatchViews, ViewTriple};
