//! Metrics for evaluating model performance.

use crate::TrainResult;
use scirs2_core::ndarray::{ArrayView, Ix2};

/// Trait for metrics.
pub trait Metric: Send {
    /// Compute metric value.
    fn compute(
        &self,
        predictions: &ArrayView<f64, Ix2>,
        targets: &ArrayView<f64, Ix2>,
    ) -> TrainResult<f64>;

    /// Get metric name.
    fn name(&self) -> &str;

    /// Reset metric state (for stateful metrics).
    fn reset(&mut self) {}
}

mod basic;
mod tracker;

pub use basic::{Accuracy, TopKAccuracy};
pub use tracker::MetricTracker;
