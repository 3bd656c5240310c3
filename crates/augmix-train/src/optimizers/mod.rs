//! Optimizers for training the classifier.
//!
//! - [`Optimizer`]: Core trait that the trainer drives
//! - [`SgdOptimizer`]: Stochastic Gradient Descent with momentum, Nesterov and weight decay
//! - [`OptimizerConfig`] and [`GradClipMode`]: shared settings

pub mod common;
pub mod sgd;

pub use common::{compute_gradient_norm, GradClipMode, Optimizer, OptimizerConfig};
pub use sgd::SgdOptimizer;
