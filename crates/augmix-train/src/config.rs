//! Training configuration.
//!
//! A [`TrainConfig`] is built once (from defaults, a TOML document or a
//! file), validated, and then moved into the [`Trainer`](crate::Trainer).
//! Nothing mutates it afterwards.

use crate::scheduler::DecayShape;
use crate::{TrainError, TrainResult};
use augmix_augment::{DepthPolicy, MixtureSpec, OperationSet, Severity};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Every option consumed by the training core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Total number of epochs.
    pub epochs: usize,

    /// Images per training step.
    pub batch_size: usize,

    /// Learning rate at the start of training.
    pub max_lr: f64,

    /// Learning rate at the end of training.
    pub min_lr: f64,

    /// Shape of the decay from `max_lr` to `min_lr`.
    pub lr_decay: DecayShape,

    /// Expected spatial size of every image.
    pub img_size: usize,

    /// Enable the consistency term and the augmented views.
    pub jsd_loss: bool,

    /// Weight of the consistency term.
    pub jsd_weight: f64,

    /// Severity handed to every augmentation operation.
    pub severity: u8,

    /// Number of parallel augmentation chains.
    pub width: usize,

    /// Chain depth; `-1` draws it per chain from 1..=3.
    pub depth: i32,

    /// Dirichlet/Beta concentration.
    pub alpha: f64,

    /// Base seed for shuffling, initialization and augmentation.
    pub seed: u64,

    /// Number of classes.
    pub num_classes: usize,

    /// Augmentation workers; zero prepares views inline.
    pub num_workers: usize,

    /// Prepared batches buffered ahead of the training step.
    pub prefetch_depth: usize,

    /// Emit a debug event every this many steps.
    pub log_frequency: usize,

    /// SGD momentum.
    pub momentum: f64,

    /// L2 weight decay.
    pub weight_decay: f64,

    /// Use Nesterov momentum.
    pub nesterov: bool,

    /// Directory for checkpoints written by [`CheckpointCallback`](crate::CheckpointCallback).
    pub save_dir: PathBuf,

    /// Operation catalog the chains draw from.
    ///
    /// Kept last so a custom list serializes as a trailing TOML table.
    pub operations: OperationSet,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 128,
            max_lr: 1.0,
            min_lr: 1e-5,
            lr_decay: DecayShape::Cosine,
            img_size: 32,
            jsd_loss: true,
            jsd_weight: 12.0,
            severity: 3,
            width: 3,
            depth: -1,
            alpha: 1.0,
            seed: 0,
            num_classes: 10,
            num_workers: 0,
            prefetch_depth: 2,
            log_frequency: 100,
            momentum: 0.9,
            weight_decay: 5e-4,
            nesterov: true,
            save_dir: PathBuf::from("./model_checkpoints"),
            operations: OperationSet::Standard,
        }
    }
}

impl TrainConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> TrainResult<Self> {
        toml::from_str(content)
            .map_err(|e| TrainError::ConfigError(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> TrainResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TrainError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> TrainResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            TrainError::ConfigError(format!("Failed to serialize configuration: {}", e))
        })
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> TrainResult<()> {
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|e| {
            TrainError::CollaboratorError(format!(
                "Failed to write config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Reject invalid option combinations.
    ///
    /// Augmentation options are only checked when `jsd_loss` is enabled,
    /// since they are unused otherwise.
    pub fn validate(&self) -> TrainResult<()> {
        if self.epochs == 0 {
            return Err(TrainError::ConfigError("epochs must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainError::ConfigError("batch_size must be at least 1".to_string()));
        }
        if self.img_size == 0 {
            return Err(TrainError::ConfigError("img_size must be at least 1".to_string()));
        }
        if self.num_classes < 2 {
            return Err(TrainError::ConfigError(format!(
                "num_classes must be at least 2, got {}",
                self.num_classes
            )));
        }

        for (name, value) in [("max_lr", self.max_lr), ("min_lr", self.min_lr)] {
            if !value.is_finite() || value < 0.0 {
                return Err(TrainError::ConfigError(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        if self.min_lr > self.max_lr {
            return Err(TrainError::ConfigError(format!(
                "min_lr ({}) must not exceed max_lr ({})",
                self.min_lr, self.max_lr
            )));
        }
        if self.lr_decay == DecayShape::Exponential && self.min_lr == 0.0 {
            return Err(TrainError::ConfigError(
                "exponential decay requires min_lr > 0".to_string(),
            ));
        }

        if !self.jsd_weight.is_finite() || self.jsd_weight < 0.0 {
            return Err(TrainError::ConfigError(format!(
                "jsd_weight must be finite and non-negative, got {}",
                self.jsd_weight
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(TrainError::ConfigError(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(TrainError::ConfigError(format!(
                "weight_decay must be finite and non-negative, got {}",
                self.weight_decay
            )));
        }
        if self.log_frequency == 0 {
            return Err(TrainError::ConfigError(
                "log_frequency must be at least 1".to_string(),
            ));
        }

        if self.jsd_loss {
            self.mixture_spec()?;
        }

        Ok(())
    }

    /// The augmentation mixture described by this configuration.
    pub fn mixture_spec(&self) -> TrainResult<MixtureSpec> {
        if self.width == 0 {
            return Err(TrainError::ConfigError(
                "width must be at least 1 when jsd_loss is enabled".to_string(),
            ));
        }
        let spec = MixtureSpec::new(
            self.width,
            DepthPolicy::from_config(self.depth)?,
            self.alpha,
            Severity::new(self.severity)?,
        )?
        .with_operations(self.operations.clone())?;
        Ok(spec)
    }
}
