//! SGD optimizer with momentum, Nesterov and weight decay.

use super::common::{compute_gradient_norm, GradClipMode, Optimizer, OptimizerConfig};
use crate::{TrainError, TrainResult};
use scirs2_core::ndarray::{Array, Ix2};
use std::collections::HashMap;

/// SGD optimizer with momentum.
///
/// Per parameter: `g = grad + wd · p`, `v = μ · v + g`, then
/// `p -= lr · (g + μ · v)` with Nesterov or `p -= lr · v` without.
#[derive(Debug)]
pub struct SgdOptimizer {
    config: OptimizerConfig,
    /// Momentum buffers for each parameter.
    velocity: HashMap<String, Array<f64, Ix2>>,
    /// Restored buffers whose parameter shape is not known yet.
    pending: HashMap<String, Vec<f64>>,
}

impl SgdOptimizer {
    /// Create a new SGD optimizer.
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            velocity: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Optimizer settings.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Apply gradient clipping if configured.
    fn clip_gradients(&self, gradients: &mut HashMap<String, Array<f64, Ix2>>) {
        if let Some(clip_value) = self.config.grad_clip {
            match self.config.grad_clip_mode {
                GradClipMode::Value => {
                    for grad in gradients.values_mut() {
                        grad.mapv_inplace(|g| g.clamp(-clip_value, clip_value));
                    }
                }
                GradClipMode::Norm => {
                    let total_norm = compute_gradient_norm(gradients);

                    if total_norm > clip_value {
                        let scale = clip_value / total_norm;
                        for grad in gradients.values_mut() {
                            grad.mapv_inplace(|g| g * scale);
                        }
                    }
                }
            }
        }
    }
}

impl Optimizer for SgdOptimizer {
    fn step(
        &mut self,
        parameters: &mut HashMap<String, Array<f64, Ix2>>,
        gradients: &HashMap<String, Array<f64, Ix2>>,
    ) -> TrainResult<()> {
        let mut clipped_gradients = gradients.clone();
        self.clip_gradients(&mut clipped_gradients);

        let lr = self.config.learning_rate;
        let momentum = self.config.momentum;
        let weight_decay = self.config.weight_decay;

        for (name, param) in parameters.iter_mut() {
            let grad = clipped_gradients.get(name).ok_or_else(|| {
                TrainError::OptimizerError(format!("Missing gradient for parameter: {}", name))
            })?;
            if grad.shape() != param.shape() {
                return Err(TrainError::OptimizerError(format!(
                    "Gradient shape {:?} does not match parameter {} shape {:?}",
                    grad.shape(),
                    name,
                    param.shape()
                )));
            }

            let mut effective = grad.clone();
            if weight_decay != 0.0 {
                effective.scaled_add(weight_decay, param);
            }

            let pending = &mut self.pending;
            let velocity = self.velocity.entry(name.clone()).or_insert_with(|| {
                pending
                    .remove(name)
                    .filter(|values| values.len() == param.len())
                    .and_then(|values| Array::from_shape_vec(param.raw_dim(), values).ok())
                    .unwrap_or_else(|| Array::zeros(param.raw_dim()))
            });

            velocity.mapv_inplace(|v| momentum * v);
            *velocity += &effective;

            if self.config.nesterov {
                effective.scaled_add(momentum, velocity);
                param.scaled_add(-lr, &effective);
            } else {
                param.scaled_add(-lr, velocity);
            }
        }

        Ok(())
    }

    fn get_lr(&self) -> f64 {
        self.config.learning_rate
    }

    fn set_lr(&mut self, lr: f64) {
        self.config.learning_rate = lr;
    }

    fn state_dict(&self) -> HashMap<String, Vec<f64>> {
        let mut state = HashMap::new();
        for (name, velocity) in &self.velocity {
            state.insert(
                format!("velocity_{}", name),
                velocity.iter().copied().collect(),
            );
        }
        state
    }

    fn load_state_dict(&mut self, state: HashMap<String, Vec<f64>>) {
        for (key, values) in state {
            let Some(name) = key.strip_prefix("velocity_") else {
                continue;
            };
            match self.velocity.get(name).map(|v| v.raw_dim()) {
                Some(shape) => {
                    if let Ok(restored) = Array::from_shape_vec(shape, values) {
                        self.velocity.insert(name.to_string(), restored);
                    }
                }
                // Shape becomes known at the first step.
                None => {
                    self.pending.insert(name.to_string(), values);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scirs2_core::array;

    fn plain_config(lr: f64) -> OptimizerConfig {
        OptimizerConfig {
            learning_rate: lr,
            momentum: 0.0,
            nesterov: false,
            weight_decay: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_sgd_optimizer() {
        let config = OptimizerConfig {
            learning_rate: 0.1,
            momentum: 0.9,
            ..Default::default()
        };
        let mut optimizer = SgdOptimizer::new(config);

        let mut params = HashMap::new();
        params.insert("w".to_string(), array![[1.0, 2.0]]);

        let mut grads = HashMap::new();
        grads.insert("w".to_string(), array![[0.1, 0.1]]);

        optimizer.step(&mut params, &grads).unwrap();

        let w = params.get("w").unwrap();
        assert!(w[[0, 0]] < 1.0);
        assert!(w[[0, 1]] < 2.0);

        let state = optimizer.state_dict();
        assert!(state.contains_key("velocity_w"));
    }

    #[test]
    fn test_plain_step_is_exact() {
        let mut optimizer = SgdOptimizer::new(plain_config(0.5));
        let mut params = HashMap::new();
        params.insert("w".to_string(), array![[1.0, -1.0]]);
        let mut grads = HashMap::new();
        grads.insert("w".to_string(), array![[0.2, -0.4]]);

        optimizer.step(&mut params, &grads).unwrap();
        assert!((params["w"][[0, 0]] - 0.9).abs() < 1e-12);
        assert!((params["w"][[0, 1]] + 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_nesterov_looks_ahead() {
        let config = OptimizerConfig {
            learning_rate: 1.0,
            momentum: 0.5,
            nesterov: true,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut optimizer = SgdOptimizer::new(config);
        let mut params = HashMap::new();
        params.insert("w".to_string(), array![[0.0]]);
        let mut grads = HashMap::new();
        grads.insert("w".to_string(), array![[1.0]]);

        // v = 1, update = g + μ·v = 1.5
        optimizer.step(&mut params, &grads).unwrap();
        assert!((params["w"][[0, 0]] + 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_weight_decay_shrinks_without_gradient() {
        let config = OptimizerConfig {
            weight_decay: 0.1,
            ..plain_config(1.0)
        };
        let mut optimizer = SgdOptimizer::new(config);
        let mut params = HashMap::new();
        params.insert("w".to_string(), array![[2.0]]);
        let mut grads = HashMap::new();
        grads.insert("w".to_string(), array![[0.0]]);

        optimizer.step(&mut params, &grads).unwrap();
        assert!((params["w"][[0, 0]] - 1.8).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_clipping() {
        let config = OptimizerConfig {
            grad_clip: Some(0.05),
            grad_clip_mode: GradClipMode::Value,
            ..plain_config(0.1)
        };
        let mut optimizer = SgdOptimizer::new(config);

        let mut params = HashMap::new();
        params.insert("w".to_string(), array![[1.0]]);

        let mut grads = HashMap::new();
        grads.insert("w".to_string(), array![[1.0]]);

        optimizer.step(&mut params, &grads).unwrap();
        assert!((params["w"][[0, 0]] - 0.995).abs() < 1e-12);
    }

    #[test]
    fn test_missing_gradient_is_error() {
        let mut optimizer = SgdOptimizer::new(plain_config(0.1));
        let mut params = HashMap::new();
        params.insert("w".to_string(), array![[1.0]]);
        let grads = HashMap::new();
        assert!(optimizer.step(&mut params, &grads).is_err());
    }

    #[test]
    fn test_restored_velocity_applies_on_first_step() {
        let config = OptimizerConfig {
            learning_rate: 1.0,
            momentum: 0.5,
            nesterov: false,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut trained = SgdOptimizer::new(config.clone());
        let mut params = HashMap::new();
        params.insert("w".to_string(), array![[0.0, 0.0]]);
        let mut grads = HashMap::new();
        grads.insert("w".to_string(), array![[1.0, 2.0]]);
        trained.step(&mut params, &grads).unwrap();

        let mut resumed = SgdOptimizer::new(config);
        resumed.load_state_dict(trained.state_dict());

        let mut a = params.clone();
        let mut b = params.clone();
        trained.step(&mut a, &grads).unwrap();
        resumed.step(&mut b, &grads).unwrap();
        assert_eq!(a["w"], b["w"]);
    }
}
