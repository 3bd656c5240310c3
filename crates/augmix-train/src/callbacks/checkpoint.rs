//! Checkpoint callbacks for saving and loading training state.

use crate::callbacks::core::Callback;
use crate::{TrainConfig, TrainError, TrainResult, TrainingHistory, TrainingState};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Compression method for checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointCompression {
    /// Plain JSON.
    #[default]
    None,
    /// Gzip at the default level.
    Gzip,
    /// Gzip, fastest level.
    GzipFast,
    /// Gzip, best ratio.
    GzipBest,
}

impl CheckpointCompression {
    fn level(self) -> Option<Compression> {
        match self {
            CheckpointCompression::None => None,
            CheckpointCompression::Gzip => Some(Compression::default()),
            CheckpointCompression::GzipFast => Some(Compression::fast()),
            CheckpointCompression::GzipBest => Some(Compression::best()),
        }
    }

    fn extension(self) -> &'static str {
        match self {
            CheckpointCompression::None => "json",
            _ => "json.gz",
        }
    }
}

/// Everything needed to resume a run.
///
/// Parameters are stored flattened; the model restores them into its own
/// shapes through [`Model::load_state_dict`](crate::Model::load_state_dict).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrainingCheckpoint {
    /// Epoch that just completed.
    pub epoch: usize,
    /// Global step count at the end of that epoch.
    pub step: usize,
    /// Model parameters as flattened vectors.
    pub parameters: HashMap<String, Vec<f64>>,
    /// Optimizer state as flattened vectors.
    pub optimizer_state: HashMap<String, Vec<f64>>,
    /// Learning-rate schedule state.
    pub scheduler_state: Option<HashMap<String, f64>>,
    /// Mean training loss of the epoch.
    pub train_loss: f64,
    /// Validation loss of the epoch, if a validation set was given.
    pub val_loss: Option<f64>,
    /// Learning rate after the last step of the epoch.
    pub learning_rate: f64,
    /// Per-epoch history up to and including this epoch.
    pub history: TrainingHistory,
}

impl TrainingCheckpoint {
    /// Snapshot the current run.
    pub fn capture(
        state: &TrainingState,
        history: &TrainingHistory,
        parameters: HashMap<String, Vec<f64>>,
        optimizer_state: HashMap<String, Vec<f64>>,
        scheduler_state: Option<HashMap<String, f64>>,
    ) -> Self {
        Self {
            epoch: state.epoch,
            step: state.step,
            parameters,
            optimizer_state,
            scheduler_state,
            train_loss: state.train_loss,
            val_loss: state.val_loss,
            learning_rate: state.learning_rate,
            history: history.clone(),
        }
    }

    /// Save as plain JSON.
    pub fn save(&self, path: &Path) -> TrainResult<()> {
        self.save_with_compression(path, CheckpointCompression::None)
    }

    /// Save with the given compression, creating parent directories.
    pub fn save_with_compression(
        &self,
        path: &Path,
        compression: CheckpointCompression,
    ) -> TrainResult<()> {
        let json = serde_json::to_vec(self).map_err(|e| {
            TrainError::CheckpointError(format!("Failed to serialize checkpoint: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TrainError::CheckpointError(format!(
                    "Failed to create checkpoint directory {:?}: {}",
                    parent, e
                ))
            })?;
        }

        let file = File::create(path).map_err(|e| {
            TrainError::CheckpointError(format!("Failed to create checkpoint {:?}: {}", path, e))
        })?;
        let write_err =
            |e: std::io::Error| TrainError::CheckpointError(format!("Failed to write {:?}: {}", path, e));

        match compression.level() {
            None => {
                let mut writer = BufWriter::new(file);
                writer.write_all(&json).map_err(write_err)?;
                writer.flush().map_err(write_err)?;
            }
            Some(level) => {
                let mut encoder = GzEncoder::new(BufWriter::new(file), level);
                encoder.write_all(&json).map_err(write_err)?;
                encoder.finish().map_err(write_err)?.flush().map_err(write_err)?;
            }
        }
        Ok(())
    }

    /// Load a checkpoint, decompressing when the path ends in `.gz`.
    pub fn load(path: &Path) -> TrainResult<Self> {
        let file = File::open(path).map_err(|e| {
            TrainError::CheckpointError(format!("Failed to open checkpoint {:?}: {}", path, e))
        })?;

        let mut json = Vec::new();
        let read_result = if path.extension().is_some_and(|ext| ext == "gz") {
            GzDecoder::new(BufReader::new(file)).read_to_end(&mut json)
        } else {
            BufReader::new(file).read_to_end(&mut json)
        };
        read_result.map_err(|e| {
            TrainError::CheckpointError(format!("Failed to read checkpoint {:?}: {}", path, e))
        })?;

        serde_json::from_slice(&json).map_err(|e| {
            TrainError::CheckpointError(format!("Failed to deserialize checkpoint: {}", e))
        })
    }

    /// Estimated payload size in bytes.
    pub fn estimated_size(&self) -> usize {
        let floats: usize = self
            .parameters
            .values()
            .chain(self.optimizer_state.values())
            .map(Vec::len)
            .sum::<usize>()
            + self.history.len() * 3;
        floats * std::mem::size_of::<f64>()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SavedCheckpoint {
    epoch: usize,
    val_loss: Option<f64>,
    path: PathBuf,
}

/// Callback that writes a [`TrainingCheckpoint`] every few epochs.
///
/// With `keep_top_k` set, older files beyond the best `k` (by validation
/// loss, newest first when no validation loss exists) are deleted.
#[derive(Debug, Clone)]
pub struct CheckpointCallback {
    /// Directory to save checkpoints.
    pub checkpoint_dir: PathBuf,
    /// Save every N epochs (epochs counted from 1).
    pub save_frequency: usize,
    /// Only save when validation loss improves.
    pub save_best_only: bool,
    /// Maximum number of checkpoints to keep.
    pub keep_top_k: Option<usize>,
    /// Compression of written files.
    pub compression: CheckpointCompression,
    best_val_loss: Option<f64>,
    saved: Vec<SavedCheckpoint>,
}

impl CheckpointCallback {
    /// Create a new checkpoint callback.
    pub fn new(checkpoint_dir: impl Into<PathBuf>, save_frequency: usize, save_best_only: bool) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            save_frequency: save_frequency.max(1),
            save_best_only,
            keep_top_k: None,
            compression: CheckpointCompression::None,
            best_val_loss: None,
            saved: Vec::new(),
        }
    }

    /// Save every epoch into the configured `save_dir`.
    pub fn from_config(config: &TrainConfig) -> Self {
        Self::new(&config.save_dir, 1, false)
    }

    /// Keep at most `k` checkpoints on disk.
    pub fn with_keep_top_k(mut self, k: usize) -> Self {
        self.keep_top_k = Some(k);
        self
    }

    /// Write compressed checkpoints.
    pub fn with_compression(mut self, compression: CheckpointCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Paths of the checkpoints currently tracked.
    pub fn saved_paths(&self) -> Vec<&Path> {
        self.saved.iter().map(|c| c.path.as_path()).collect()
    }

    /// Path of the tracked checkpoint with the lowest validation loss.
    pub fn best_path(&self) -> Option<&Path> {
        self.saved
            .iter()
            .filter_map(|c| c.val_loss.map(|loss| (loss, c)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, c)| c.path.as_path())
    }

    fn path_for(&self, epoch: usize) -> PathBuf {
        self.checkpoint_dir.join(format!(
            "checkpoint_epoch_{}.{}",
            epoch,
            self.compression.extension()
        ))
    }

    /// Delete checkpoints beyond the best `keep_top_k`. Returns how many were removed.
    pub fn cleanup_checkpoints(&mut self) -> TrainResult<usize> {
        let Some(keep) = self.keep_top_k else {
            return Ok(0);
        };
        if self.saved.len() <= keep {
            return Ok(0);
        }

        self.saved.sort_by(|a, b| match (a.val_loss, b.val_loss) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.epoch.cmp(&a.epoch),
        });

        let removed: Vec<SavedCheckpoint> = self.saved.drain(keep..).collect();
        for checkpoint in &removed {
            match std::fs::remove_file(&checkpoint.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(TrainError::CheckpointError(format!(
                        "Failed to delete checkpoint {:?}: {}",
                        checkpoint.path, e
                    )))
                }
            }
        }
        Ok(removed.len())
    }
}

impl Callback for CheckpointCallback {
    fn on_checkpoint(&mut self, checkpoint: &TrainingCheckpoint) -> TrainResult<()> {
        if !(checkpoint.epoch + 1).is_multiple_of(self.save_frequency) {
            return Ok(());
        }

        if self.save_best_only {
            let Some(val_loss) = checkpoint.val_loss else {
                return Ok(());
            };
            if self.best_val_loss.is_some_and(|best| val_loss >= best) {
                return Ok(());
            }
            self.best_val_loss = Some(val_loss);
        }

        let path = self.path_for(checkpoint.epoch);
        checkpoint.save_with_compression(&path, self.compression)?;
        self.saved.push(SavedCheckpoint {
            epoch: checkpoint.epoch,
            val_loss: checkpoint.val_loss,
            path: path.clone(),
        });

        let deleted = self.cleanup_checkpoints()?;
        tracing::info!(path = %path.display(), deleted, "checkpoint saved");
        Ok(())
    }
}
