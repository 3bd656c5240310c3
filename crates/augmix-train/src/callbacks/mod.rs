//! Training callbacks for monitoring and controlling training.

mod checkpoint;
mod core;
mod metrics_logging;

pub use checkpoint::{CheckpointCallback, CheckpointCompression, TrainingCheckpoint};
pub use self::core::{Callback, CallbackList, EarlyStoppingCallback};
pub use metrics_logging::MetricsLoggingCallback;
