//! Loss functions for training.
//!
//! [`CrossEntropyLoss`] is the supervised term. [`JsdObjective`] adds the
//! Jensen-Shannon consistency term across the original and two augmented
//! views:
//!
//! ```text
//! m     = (p_orig + p_a + p_b) / 3
//! JSD   = (KL(p_orig ‖ m) + KL(p_a ‖ m) + KL(p_b ‖ m)) / 3
//! total = CE(p_orig, y) + λ · JSD
//! ```
//!
//! Every logarithm is taken of a value clamped to `epsilon`, and both terms
//! are averaged over the batch.

use crate::{TrainError, TrainResult};
use scirs2_core::ndarray::{Array, Array1, ArrayView, ArrayView2, Ix2};
use std::fmt::Debug;

/// Trait for loss functions.
pub trait Loss: Debug {
    /// Compute loss value.
    fn compute(
        &self,
        predictions: &ArrayView<f64, Ix2>,
        targets: &ArrayView<f64, Ix2>,
    ) -> TrainResult<f64>;

    /// Compute loss gradient with respect to predictions.
    fn gradient(
        &self,
        predictions: &ArrayView<f64, Ix2>,
        targets: &ArrayView<f64, Ix2>,
    ) -> TrainResult<Array<f64, Ix2>>;

    /// Get the name of the loss function.
    fn name(&self) -> &str {
        "unknown"
    }
}

fn check_shapes(
    predictions: &ArrayView<f64, Ix2>,
    targets: &ArrayView<f64, Ix2>,
) -> TrainResult<()> {
    if predictions.shape() != targets.shape() {
        return Err(TrainError::LossError(format!(
            "Shape mismatch: predictions {:?} vs targets {:?}",
            predictions.shape(),
            targets.shape()
        )));
    }
    if predictions.nrows() == 0 {
        return Err(TrainError::LossError("Empty batch".to_string()));
    }
    Ok(())
}

fn check_finite(name: &str, values: &ArrayView<f64, Ix2>) -> TrainResult<()> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(TrainError::NumericalError(format!(
            "{} contain non-finite values",
            name
        )));
    }
    Ok(())
}

/// Cross-entropy loss for classification.
///
/// Expects probabilities (post-softmax) and one-hot targets.
#[derive(Debug, Clone)]
pub struct CrossEntropyLoss {
    /// Epsilon for numerical stability.
    pub epsilon: f64,
}

impl Default for CrossEntropyLoss {
    fn default() -> Self {
        Self { epsilon: 1e-10 }
    }
}

impl CrossEntropyLoss {
    fn clamp(&self, p: f64) -> f64 {
        p.max(self.epsilon).min(1.0 - self.epsilon)
    }
}

impl Loss for CrossEntropyLoss {
    fn compute(
        &self,
        predictions: &ArrayView<f64, Ix2>,
        targets: &ArrayView<f64, Ix2>,
    ) -> TrainResult<f64> {
        check_shapes(predictions, targets)?;

        let n = predictions.nrows() as f64;
        let total: f64 = predictions
            .iter()
            .zip(targets.iter())
            .map(|(&p, &t)| -t * self.clamp(p).ln())
            .sum();

        Ok(total / n)
    }

    fn gradient(
        &self,
        predictions: &ArrayView<f64, Ix2>,
        targets: &ArrayView<f64, Ix2>,
    ) -> TrainResult<Array<f64, Ix2>> {
        check_shapes(predictions, targets)?;

        let n = predictions.nrows() as f64;
        let mut grad = Array::zeros(predictions.raw_dim());
        grad.zip_mut_with(predictions, |g, &p| *g = self.clamp(p));
        grad.zip_mut_with(targets, |g, &t| *g = -(t / *g) / n);

        Ok(grad)
    }

    fn name(&self) -> &str {
        "cross_entropy"
    }
}

/// Loss value split into its terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossBreakdown {
    /// `cross_entropy + weight · consistency`.
    pub total: f64,
    /// Batch-mean cross-entropy on the original view.
    pub cross_entropy: f64,
    /// Batch-mean Jensen-Shannon divergence, when computed.
    pub consistency: Option<f64>,
}

/// Gradient of the total loss with respect to each view's probabilities.
#[derive(Debug, Clone)]
pub struct ViewGradients {
    pub original: Array<f64, Ix2>,
    pub view_a: Option<Array<f64, Ix2>>,
    pub view_b: Option<Array<f64, Ix2>>,
}

/// Cross-entropy plus weighted Jensen-Shannon consistency.
#[derive(Debug, Clone)]
pub struct JsdObjective {
    /// λ, the weight of the consistency term.
    pub weight: f64,
    /// Floor applied before every logarithm.
    pub epsilon: f64,
}

impl Default for JsdObjective {
    fn default() -> Self {
        Self {
            weight: 12.0,
            epsilon: 1e-7,
        }
    }
}

impl JsdObjective {
    /// Create an objective with the given consistency weight.
    pub fn new(weight: f64) -> TrainResult<Self> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(TrainError::ConfigError(format!(
                "consistency weight must be finite and non-negative, got {}",
                weight
            )));
        }
        Ok(Self {
            weight,
            ..Self::default()
        })
    }

    /// The supervised term used by this objective.
    pub fn cross_entropy(&self) -> CrossEntropyLoss {
        CrossEntropyLoss {
            epsilon: self.epsilon,
        }
    }

    /// Compute the loss for one batch.
    ///
    /// With `use_consistency == false` the augmented views are never read
    /// and the result is exactly the cross-entropy of `pred_orig`.
    pub fn compute_loss(
        &self,
        pred_orig: &ArrayView2<f64>,
        views: Option<(&ArrayView2<f64>, &ArrayView2<f64>)>,
        labels: &ArrayView2<f64>,
        use_consistency: bool,
    ) -> TrainResult<LossBreakdown> {
        check_finite("original predictions", pred_orig)?;
        let cross_entropy = self.cross_entropy().compute(pred_orig, labels)?;

        if !use_consistency {
            return Ok(LossBreakdown {
                total: cross_entropy,
                cross_entropy,
                consistency: None,
            });
        }

        let (pred_a, pred_b) = self.require_views(pred_orig, views)?;
        let per_example = self.consistency_per_example(pred_orig, pred_a, pred_b)?;
        let consistency = per_example.mean().unwrap_or(0.0);
        let total = cross_entropy + self.weight * consistency;

        if !total.is_finite() {
            return Err(TrainError::NumericalError(format!(
                "non-finite loss (cross-entropy {}, consistency {})",
                cross_entropy, consistency
            )));
        }

        Ok(LossBreakdown {
            total,
            cross_entropy,
            consistency: Some(consistency),
        })
    }

    /// Per-example Jensen-Shannon divergence among the three views.
    ///
    /// Classes where all three probabilities are equal contribute exactly
    /// zero, and each example's value is floored at zero.
    pub fn consistency_per_example(
        &self,
        pred_orig: &ArrayView2<f64>,
        pred_a: &ArrayView2<f64>,
        pred_b: &ArrayView2<f64>,
    ) -> TrainResult<Array1<f64>> {
        check_shapes(pred_orig, pred_a)?;
        check_shapes(pred_orig, pred_b)?;
        check_finite("view A predictions", pred_a)?;
        check_finite("view B predictions", pred_b)?;

        let eps = self.epsilon;
        let mut out = Array1::zeros(pred_orig.nrows());

        for (i, value) in out.iter_mut().enumerate() {
            let mut sum = 0.0;
            for j in 0..pred_orig.ncols() {
                let (p0, pa, pb) = (pred_orig[[i, j]], pred_a[[i, j]], pred_b[[i, j]]);
                if p0 == pa && pa == pb {
                    continue;
                }
                let log_m = ((p0 + pa + pb) / 3.0).max(eps).ln();
                for p in [p0, pa, pb] {
                    sum += p * (p.max(eps).ln() - log_m);
                }
            }
            *value = (sum / 3.0).max(0.0);
        }

        Ok(out)
    }

    /// Gradient of [`compute_loss`](Self::compute_loss)'s total with respect
    /// to each probability matrix.
    ///
    /// The original view receives `−y / p / n + λ / (3n) · ln(p / m)`; the
    /// augmented views receive the consistency part only.
    pub fn gradients(
        &self,
        pred_orig: &ArrayView2<f64>,
        views: Option<(&ArrayView2<f64>, &ArrayView2<f64>)>,
        labels: &ArrayView2<f64>,
        use_consistency: bool,
    ) -> TrainResult<ViewGradients> {
        let mut original = self.cross_entropy().gradient(pred_orig, labels)?;

        if !use_consistency {
            return Ok(ViewGradients {
                original,
                view_a: None,
                view_b: None,
            });
        }

        let (pred_a, pred_b) = self.require_views(pred_orig, views)?;
        check_shapes(pred_orig, pred_a)?;
        check_shapes(pred_orig, pred_b)?;

        let eps = self.epsilon;
        let scale = self.weight / (3.0 * pred_orig.nrows() as f64);
        let mut view_a = Array::zeros(pred_orig.raw_dim());
        let mut view_b = Array::zeros(pred_orig.raw_dim());

        for ((i, j), g0) in original.indexed_iter_mut() {
            let (p0, pa, pb) = (pred_orig[[i, j]], pred_a[[i, j]], pred_b[[i, j]]);
            if p0 == pa && pa == pb {
                continue;
            }
            let log_m = ((p0 + pa + pb) / 3.0).max(eps).ln();
            *g0 += scale * (p0.max(eps).ln() - log_m);
            view_a[[i, j]] = scale * (pa.max(eps).ln() - log_m);
            view_b[[i, j]] = scale * (pb.max(eps).ln() - log_m);
        }

        Ok(ViewGradients {
            original,
            view_a: Some(view_a),
            view_b: Some(view_b),
        })
    }

    fn require_views<'a, 'b>(
        &self,
        pred_orig: &ArrayView2<f64>,
        views: Option<(&'a ArrayView2<'b, f64>, &'a ArrayView2<'b, f64>)>,
    ) -> TrainResult<(&'a ArrayView2<'b, f64>, &'a ArrayView2<'b, f64>)> {
        let (pred_a, pred_b) = views.ok_or_else(|| {
            TrainError::LossError(
                "consistency term requested without augmented predictions".to_string(),
            )
        })?;
        if pred_a.shape() != pred_orig.shape() || pred_b.shape() != pred_orig.shape() {
            return Err(TrainError::LossError(format!(
                "Shape mismatch between views: {:?}, {:?}, {:?}",
                pred_orig.shape(),
                pred_a.shape(),
                pred_b.shape()
            )));
        }
        Ok((pred_a, pred_b))
    }
}
