//! Learning rate schedules.
//!
//! Schedules decay from `max_lr` at progress 0 to `min_lr` at the final
//! progress value; progress beyond the end stays at `min_lr`.

use crate::{Optimizer, TrainError, TrainResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trait for learning rate schedulers.
pub trait LrScheduler {
    /// Advance one unit of progress and push the new rate to the optimizer.
    fn step(&mut self, optimizer: &mut dyn Optimizer);

    /// Get current learning rate.
    fn get_lr(&self) -> f64;

    /// Get scheduler state as a dictionary.
    fn state_dict(&self) -> HashMap<String, f64>;

    /// Load scheduler state from a dictionary.
    fn load_state_dict(&mut self, state: &HashMap<String, f64>) -> TrainResult<()>;
}

/// Curve followed between `max_lr` and `min_lr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayShape {
    /// Half-period cosine.
    #[default]
    Cosine,
    /// Straight line.
    Linear,
    /// Geometric interpolation; requires `min_lr > 0`.
    Exponential,
}

impl DecayShape {
    /// Rate at `progress` in `[0, 1]`.
    fn rate(self, progress: f64, min_lr: f64, max_lr: f64) -> f64 {
        match self {
            DecayShape::Cosine => {
                let decay = 0.5 * (1.0 + (std::f64::consts::PI * progress).cos());
                min_lr + (max_lr - min_lr) * decay
            }
            DecayShape::Linear => max_lr + (min_lr - max_lr) * progress,
            DecayShape::Exponential => max_lr * (min_lr / max_lr).powf(progress),
        }
    }
}

fn validate_bounds(min_lr: f64, max_lr: f64, shape: DecayShape) -> TrainResult<()> {
    if !min_lr.is_finite() || !max_lr.is_finite() || min_lr < 0.0 {
        return Err(TrainError::ConfigError(format!(
            "learning rate bounds must be finite and non-negative, got [{}, {}]",
            min_lr, max_lr
        )));
    }
    if min_lr > max_lr {
        return Err(TrainError::ConfigError(format!(
            "min_lr ({}) must not exceed max_lr ({})",
            min_lr, max_lr
        )));
    }
    if shape == DecayShape::Exponential && min_lr == 0.0 {
        return Err(TrainError::ConfigError(
            "exponential decay requires min_lr > 0".to_string(),
        ));
    }
    Ok(())
}

/// Evaluate a schedule of the given shape.
pub fn rate_with_shape(
    progress: usize,
    total: usize,
    min_lr: f64,
    max_lr: f64,
    shape: DecayShape,
) -> TrainResult<f64> {
    validate_bounds(min_lr, max_lr, shape)?;
    Ok(evaluate(progress, total, min_lr, max_lr, shape))
}

fn evaluate(progress: usize, total: usize, min_lr: f64, max_lr: f64, shape: DecayShape) -> f64 {
    if progress >= total {
        return min_lr;
    }
    if progress == 0 {
        return max_lr;
    }
    let fraction = progress as f64 / total as f64;
    shape.rate(fraction, min_lr, max_lr).clamp(min_lr, max_lr)
}

/// Cosine decay from `max_lr` at `progress == 0` to `min_lr` at `progress == total`.
pub fn rate_at(progress: usize, total: usize, min_lr: f64, max_lr: f64) -> TrainResult<f64> {
    rate_with_shape(progress, total, min_lr, max_lr, DecayShape::Cosine)
}

/// Decay-from-max schedule over a fixed number of steps.
#[derive(Debug, Clone)]
pub struct LrSchedule {
    /// Rate at the end of training.
    pub min_lr: f64,
    /// Rate at the start of training.
    pub max_lr: f64,
    /// Steps from `max_lr` to `min_lr`.
    pub total: usize,
    /// Decay curve.
    pub shape: DecayShape,
    current_step: usize,
    current_lr: f64,
}

impl LrSchedule {
    /// Create a schedule, rejecting inverted or invalid bounds.
    pub fn new(min_lr: f64, max_lr: f64, total: usize, shape: DecayShape) -> TrainResult<Self> {
        let current_lr = rate_with_shape(0, total, min_lr, max_lr, shape)?;
        Ok(Self {
            min_lr,
            max_lr,
            total,
            shape,
            current_step: 0,
            current_lr,
        })
    }

    /// Rate at an arbitrary progress value.
    pub fn rate_at(&self, progress: usize) -> f64 {
        evaluate(progress, self.total, self.min_lr, self.max_lr, self.shape)
    }

    /// Steps taken so far.
    pub fn current_step(&self) -> usize {
        self.current_step
    }
}

impl LrScheduler for LrSchedule {
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        self.current_step += 1;
        self.current_lr = self.rate_at(self.current_step);
        optimizer.set_lr(self.current_lr);
    }

    fn get_lr(&self) -> f64 {
        self.current_lr
    }

    fn state_dict(&self) -> HashMap<String, f64> {
        let mut state = HashMap::new();
        state.insert("min_lr".to_string(), self.min_lr);
        state.insert("max_lr".to_string(), self.max_lr);
        state.insert("total".to_string(), self.total as f64);
        state.insert("current_lr".to_string(), self.current_lr);
        state.insert("current_step".to_string(), self.current_step as f64);
        state
    }

    fn load_state_dict(&mut self, state: &HashMap<String, f64>) -> TrainResult<()> {
        let step = state.get("current_step").ok_or_else(|| {
            TrainError::CheckpointError("scheduler state missing current_step".to_string())
        })?;
        if *step < 0.0 || !step.is_finite() {
            return Err(TrainError::CheckpointError(format!(
                "invalid scheduler step {}",
                step
            )));
        }
        self.current_step = *step as usize;
        self.current_lr = self.rate_at(self.current_step);
        Ok(())
    }
}
