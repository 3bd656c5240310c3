//! Core callback infrastructure for training.

use crate::callbacks::checkpoint::TrainingCheckpoint;
use crate::{TrainResult, TrainingState};

/// Trait for training callbacks.
///
/// Every hook defaults to a no-op. An error returned from any hook stops
/// the run and moves the trainer to its failed phase.
pub trait Callback {
    /// Called at the beginning of training.
    fn on_train_begin(&mut self, _state: &TrainingState) -> TrainResult<()> {
        Ok(())
    }

    /// Called at the end of training, including runs stopped early.
    fn on_train_end(&mut self, _state: &TrainingState) -> TrainResult<()> {
        Ok(())
    }

    /// Called at the beginning of an epoch.
    fn on_epoch_begin(&mut self, _epoch: usize, _state: &TrainingState) -> TrainResult<()> {
        Ok(())
    }

    /// Called at the end of an epoch, after validation.
    fn on_epoch_end(&mut self, _epoch: usize, _state: &TrainingState) -> TrainResult<()> {
        Ok(())
    }

    /// Called at the beginning of a batch.
    fn on_batch_begin(&mut self, _batch: usize, _state: &TrainingState) -> TrainResult<()> {
        Ok(())
    }

    /// Called at the end of a batch, after the parameter update.
    fn on_batch_end(&mut self, _batch: usize, _state: &TrainingState) -> TrainResult<()> {
        Ok(())
    }

    /// Called after the validation pass of an epoch.
    fn on_validation_end(&mut self, _state: &TrainingState) -> TrainResult<()> {
        Ok(())
    }

    /// Called once per epoch with a snapshot of the full training state.
    fn on_checkpoint(&mut self, _checkpoint: &TrainingCheckpoint) -> TrainResult<()> {
        Ok(())
    }

    /// Check if training should stop early.
    fn should_stop(&self) -> bool {
        false
    }
}

/// List of callbacks to execute in order.
#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn Callback>>,
}

impl CallbackList {
    /// Create a new callback list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback to the list.
    pub fn add(&mut self, callback: Box<dyn Callback>) {
        self.callbacks.push(callback);
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn for_each(
        &mut self,
        mut hook: impl FnMut(&mut dyn Callback) -> TrainResult<()>,
    ) -> TrainResult<()> {
        for callback in &mut self.callbacks {
            hook(callback.as_mut())?;
        }
        Ok(())
    }

    /// Execute on_train_begin for all callbacks.
    pub fn on_train_begin(&mut self, state: &TrainingState) -> TrainResult<()> {
        self.for_each(|cb| cb.on_train_begin(state))
    }

    /// Execute on_train_end for all callbacks.
    pub fn on_train_end(&mut self, state: &TrainingState) -> TrainResult<()> {
        self.for_each(|cb| cb.on_train_end(state))
    }

    /// Execute on_epoch_begin for all callbacks.
    pub fn on_epoch_begin(&mut self, epoch: usize, state: &TrainingState) -> TrainResult<()> {
        self.for_each(|cb| cb.on_epoch_begin(epoch, state))
    }

    /// Execute on_epoch_end for all callbacks.
    pub fn on_epoch_end(&mut self, epoch: usize, state: &TrainingState) -> TrainResult<()> {
        self.for_each(|cb| cb.on_epoch_end(epoch, state))
    }

    /// Execute on_batch_begin for all callbacks.
    pub fn on_batch_begin(&mut self, batch: usize, state: &TrainingState) -> TrainResult<()> {
        self.for_each(|cb| cb.on_batch_begin(batch, state))
    }

    /// Execute on_batch_end for all callbacks.
    pub fn on_batch_end(&mut self, batch: usize, state: &TrainingState) -> TrainResult<()> {
        self.for_each(|cb| cb.on_batch_end(batch, state))
    }

    /// Execute on_validation_end for all callbacks.
    pub fn on_validation_end(&mut self, state: &TrainingState) -> TrainResult<()> {
        self.for_each(|cb| cb.on_validation_end(state))
    }

    /// Execute on_checkpoint for all callbacks.
    pub fn on_checkpoint(&mut self, checkpoint: &TrainingCheckpoint) -> TrainResult<()> {
        self.for_each(|cb| cb.on_checkpoint(checkpoint))
    }

    /// Check if any callback requests early stopping.
    pub fn should_stop(&self) -> bool {
        self.callbacks.iter().any(|cb| cb.should_stop())
    }
}

/// Callback that stops training when validation loss stops improving.
#[derive(Debug, Clone)]
pub struct EarlyStoppingCallback {
    /// Epochs without improvement before stopping.
    pub patience: usize,
    /// Minimum decrease that counts as an improvement.
    pub min_delta: f64,
    best_val_loss: Option<f64>,
    wait: usize,
    stop_training: bool,
}

impl EarlyStoppingCallback {
    /// Create a new early stopping callback.
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best_val_loss: None,
            wait: 0,
            stop_training: false,
        }
    }

    /// Best validation loss seen so far.
    pub fn best_val_loss(&self) -> Option<f64> {
        self.best_val_loss
    }
}

impl Callback for EarlyStoppingCallback {
    fn on_epoch_end(&mut self, epoch: usize, state: &TrainingState) -> TrainResult<()> {
        let Some(val_loss) = state.val_loss else {
            return Ok(());
        };

        let improved = self
            .best_val_loss
            .is_none_or(|best| val_loss < best - self.min_delta);

        if improved {
            self.best_val_loss = Some(val_loss);
            self.wait = 0;
        } else {
            self.wait += 1;
            if self.wait >= self.patience {
                tracing::info!(
                    epoch,
                    patience = self.patience,
                    "early stopping: no validation improvement"
                );
                self.stop_training = true;
            }
        }
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.stop_training
    }
}
