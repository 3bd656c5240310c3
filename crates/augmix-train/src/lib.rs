//! AugMix training core.
//!
//! This crate wires augmented batch views from [`augmix_augment`] into a
//! training loop:
//! - The cross-entropy plus Jensen-Shannon consistency objective ([`JsdObjective`])
//! - Learning-rate decay from `max_lr` to `min_lr` over every step ([`LrSchedule`])
//! - SGD with momentum, Nesterov and weight decay ([`SgdOptimizer`])
//! - A [`Trainer`] with an explicit phase, stop handle and callbacks
//! - Checkpointing, early stopping and metric logging callbacks
//! - Validated TOML configuration ([`TrainConfig`])
//!
//! Models plug in through the [`Model`] trait; [`SoftmaxClassifier`] is a
//! minimal linear implementation used for tests and benchmarks.

mod batch;
mod callbacks;
mod config;
mod data;
mod error;
mod logging;
mod loss;
mod metrics;
mod model;
mod optimizers;
mod scheduler;
mod trainer;

#[cfg(feature = "structured-logging")]
pub mod structured_logging;

pub use batch::{extract_images, extract_rows, BatchConfig, BatchIterator};
pub use callbacks::{
    Callback, CallbackList, CheckpointCallback, CheckpointCompression, EarlyStoppingCallback,
    MetricsLoggingCallback, TrainingCheckpoint,
};
pub use config::TrainConfig;
pub use data::{one_hot, Dataset};
pub use error::{TrainError, TrainResult};
pub use logging::{
    ConsoleLogger, CsvLogger, FileLogger, JsonlLogger, LogRecord, LoggingBackend, MetricsLogger,
};
pub use loss::{CrossEntropyLoss, JsdObjective, Loss, LossBreakdown, ViewGradients};
pub use metrics::{Accuracy, Metric, MetricTracker, TopKAccuracy};
pub use model::{softmax, Model, SoftmaxClassifier};
pub use optimizers::{compute_gradient_norm, GradClipMode, Optimizer, OptimizerConfig, SgdOptimizer};
pub use scheduler::{rate_at, rate_with_shape, DecayShape, LrSchedule, LrScheduler};
pub use trainer::{
    Evaluation, StopHandle, Trainer, TrainerPhase, TrainingHistory, TrainingState,
};
