//! Forwarding of training metrics to logging backends.

use crate::callbacks::core::Callback;
use crate::logging::MetricsLogger;
use crate::{TrainResult, TrainingState};

/// Callback that forwards training progress to a [`MetricsLogger`].
///
/// Epoch records use the epoch index as step. When `batch_frequency` is
/// set, `batch_loss` and `learning_rate` are also logged every N global
/// steps, using the global step.
#[derive(Debug)]
pub struct MetricsLoggingCallback {
    logger: MetricsLogger,
    batch_frequency: Option<usize>,
}

impl MetricsLoggingCallback {
    /// Log epoch summaries only.
    pub fn new(logger: MetricsLogger) -> Self {
        Self {
            logger,
            batch_frequency: None,
        }
    }

    /// Also log every `frequency` steps.
    pub fn with_batch_frequency(mut self, frequency: usize) -> Self {
        self.batch_frequency = Some(frequency.max(1));
        self
    }

    /// The wrapped logger.
    pub fn logger(&self) -> &MetricsLogger {
        &self.logger
    }
}

impl Callback for MetricsLoggingCallback {
    fn on_train_begin(&mut self, state: &TrainingState) -> TrainResult<()> {
        self.logger
            .log_message(&format!("training started at epoch {}", state.epoch))
    }

    fn on_batch_end(&mut self, _batch: usize, state: &TrainingState) -> TrainResult<()> {
        let Some(frequency) = self.batch_frequency else {
            return Ok(());
        };
        if !state.step.is_multiple_of(frequency) {
            return Ok(());
        }
        self.logger.set_step(state.step);
        self.logger.log_metric("batch_loss", state.batch_loss)?;
        self.logger.log_metric("learning_rate", state.learning_rate)
    }

    fn on_epoch_end(&mut self, epoch: usize, state: &TrainingState) -> TrainResult<()> {
        self.logger.set_step(epoch);
        self.logger.log_metric("train_loss", state.train_loss)?;
        if let Some(val_loss) = state.val_loss {
            self.logger.log_metric("val_loss", val_loss)?;
        }
        self.logger.log_metric("learning_rate", state.learning_rate)?;
        self.logger.log_metrics(&state.metrics)?;
        self.logger.flush()
    }

    fn on_train_end(&mut self, state: &TrainingState) -> TrainResult<()> {
        self.logger.log_message(&format!(
            "training ended at epoch {} after {} steps",
            state.epoch, state.step
        ))?;
        self.logger.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{JsonlLogger, LogRecord};
    use std::collections::HashMap;

    #[test]
    fn test_epoch_metrics_are_forwarded() {
        let path = std::env::temp_dir().join(format!(
            "augmix_metrics_logging_{}.jsonl",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let logger = MetricsLogger::new().with_backend(JsonlLogger::new(&path).unwrap());
        let mut callback = MetricsLoggingCallback::new(logger).with_batch_frequency(2);

        let mut metrics = HashMap::new();
        metrics.insert("accuracy".to_string(), 0.5);
        let mut state = TrainingState {
            epoch: 1,
            step: 4,
            train_loss: 2.0,
            val_loss: Some(1.5),
            batch_loss: 1.9,
            learning_rate: 0.1,
            metrics,
            ..Default::default()
        };

        callback.on_batch_end(0, &state).unwrap();
        state.step = 5;
        callback.on_batch_end(1, &state).unwrap();
        callback.on_epoch_end(1, &state).unwrap();

        let scalars: Vec<(String, usize)> = JsonlLogger::read_records(&path)
            .unwrap()
            .into_iter()
            .filter_map(|record| match record {
                LogRecord::Scalar { name, step, .. } => Some((name, step)),
                LogRecord::Text { .. } => None,
            })
            .collect();

        assert_eq!(
            scalars,
            vec![
                ("batch_loss".to_string(), 4),
                ("learning_rate".to_string(), 4),
                ("train_loss".to_string(), 1),
                ("val_loss".to_string(), 1),
                ("learning_rate".to_string(), 1),
                ("accuracy".to_string(), 1),
            ]
        );

        std::fs::remove_file(&path).ok();
    }
}
