//! Classification metrics.

use crate::{TrainError, TrainResult};
use scirs2_core::ndarray::{ArrayView, ArrayView1, Ix2};

use super::Metric;

fn check_shapes(
    predictions: &ArrayView<f64, Ix2>,
    targets: &ArrayView<f64, Ix2>,
) -> TrainResult<()> {
    if predictions.shape() != targets.shape() {
        return Err(TrainError::MetricsError(format!(
            "Shape mismatch: predictions {:?} vs targets {:?}",
            predictions.shape(),
            targets.shape()
        )));
    }
    if predictions.nrows() == 0 {
        return Err(TrainError::MetricsError("Empty batch".to_string()));
    }
    Ok(())
}

/// Index of the largest entry; ties go to the lowest index.
fn argmax(row: &ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (j, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = j;
        }
    }
    best
}

/// Top-1 accuracy: fraction of rows whose argmax matches the one-hot target.
#[derive(Debug, Clone, Default)]
pub struct Accuracy;

impl Metric for Accuracy {
    fn compute(
        &self,
        predictions: &ArrayView<f64, Ix2>,
        targets: &ArrayView<f64, Ix2>,
    ) -> TrainResult<f64> {
        check_shapes(predictions, targets)?;

        let correct = predictions
            .rows()
            .into_iter()
            .zip(targets.rows())
            .filter(|(p, t)| argmax(p) == argmax(t))
            .count();

        Ok(correct as f64 / predictions.nrows() as f64)
    }

    fn name(&self) -> &str {
        "accuracy"
    }
}

/// Fraction of rows whose target class is among the `k` highest predictions.
#[derive(Debug, Clone)]
pub struct TopKAccuracy {
    /// Number of top predictions considered.
    pub k: usize,
    name: String,
}

impl TopKAccuracy {
    /// Create a top-k accuracy metric.
    pub fn new(k: usize) -> TrainResult<Self> {
        if k == 0 {
            return Err(TrainError::InvalidParameter("k must be at least 1".to_string()));
        }
        Ok(Self {
            k,
            name: format!("top_{}_accuracy", k),
        })
    }
}

impl Metric for TopKAccuracy {
    fn compute(
        &self,
        predictions: &ArrayView<f64, Ix2>,
        targets: &ArrayView<f64, Ix2>,
    ) -> TrainResult<f64> {
        check_shapes(predictions, targets)?;

        let mut correct = 0;
        for (p, t) in predictions.rows().into_iter().zip(targets.rows()) {
            let target = argmax(&t);
            let score = p[target];
            let higher = p.iter().filter(|&&v| v > score).count();
            if higher < self.k {
                correct += 1;
            }
        }

        Ok(correct as f64 / predictions.nrows() as f64)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
