//! Main training loop implementation.
//!
//! The [`Trainer`] owns the validated configuration, the model, the
//! optimizer and the [`TrainingState`]. Each step generates the batch views,
//! runs the model on every view present, evaluates the objective, sums the
//! per-view parameter gradients and applies one optimizer update at the
//! scheduled learning rate. Each epoch ends with one validation pass on
//! clean images (cross-entropy and metrics only).

use crate::callbacks::{Callback, CallbackList, TrainingCheckpoint};
use crate::data::Dataset;
use crate::metrics::{Accuracy, MetricTracker};
use crate::{
    extract_images, BatchConfig, BatchIterator, JsdObjective, Loss, LossBreakdown, LrSchedule,
    LrScheduler, Model, Optimizer, OptimizerConfig, SgdOptimizer, TrainConfig, TrainError,
    TrainResult,
};
use augmix_augment::{
    worker_seed, BatchViewGenerator, BatchViews, PrefetchConfig, PrefetchPipeline,
};
use scirs2_core::ndarray::{s, Array, Array2, Ix2};
use scirs2_core::random::{SeedableRng, StdRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Training state passed to callbacks.
#[derive(Debug, Clone, Default)]
pub struct TrainingState {
    /// Current epoch number (0-based).
    pub epoch: usize,
    /// Global step count; incremented after every parameter update.
    pub step: usize,
    /// Batch index within the current epoch.
    pub batch: usize,
    /// Mean training loss of the last completed epoch.
    pub train_loss: f64,
    /// Validation loss of the last completed epoch.
    pub val_loss: Option<f64>,
    /// Total loss of the last batch.
    pub batch_loss: f64,
    /// Learning rate for the next step.
    pub learning_rate: f64,
    /// Validation metrics of the last completed epoch.
    pub metrics: HashMap<String, f64>,
}

/// Lifecycle of a [`Trainer`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrainerPhase {
    /// Created, not yet fitted.
    Idle,
    /// Inside an epoch; `step` is the global step about to run.
    Running {
        /// Current epoch.
        epoch: usize,
        /// Current global step.
        step: usize,
    },
    /// An epoch and its validation pass completed.
    EpochComplete {
        /// The completed epoch.
        epoch: usize,
    },
    /// All configured epochs completed.
    Finished,
    /// Stopped early by a stop request or a callback.
    Stopped {
        /// Epoch in which training stopped.
        epoch: usize,
        /// Global steps completed.
        step: usize,
    },
    /// Aborted by an error; holds its message.
    Failed(String),
}

impl TrainerPhase {
    /// Whether the trainer can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrainerPhase::Finished | TrainerPhase::Stopped { .. } | TrainerPhase::Failed(_)
        )
    }
}

/// Cloneable handle that asks a running [`Trainer`] to stop.
///
/// The trainer checks the flag after every step, so the current step
/// always completes.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request a stop after the current step.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Training history containing per-epoch losses and metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// Mean training loss per epoch.
    pub train_loss: Vec<f64>,
    /// Validation loss per epoch (empty without a validation set).
    pub val_loss: Vec<f64>,
    /// Mean consistency term per epoch (empty without `jsd_loss`).
    pub consistency: Vec<f64>,
    /// Learning rate at the end of each epoch.
    pub learning_rate: Vec<f64>,
    /// Validation metrics per epoch.
    pub metrics: HashMap<String, Vec<f64>>,
}

impl TrainingHistory {
    /// Create a new training history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded epochs.
    pub fn len(&self) -> usize {
        self.train_loss.len()
    }

    /// Whether no epoch was recorded.
    pub fn is_empty(&self) -> bool {
        self.train_loss.is_empty()
    }

    /// Best validation loss and its epoch.
    pub fn best_val_loss(&self) -> Option<(usize, f64)> {
        self.val_loss
            .iter()
            .copied()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
    }

    /// Get metric history.
    pub fn get_metric_history(&self, metric_name: &str) -> Option<&Vec<f64>> {
        self.metrics.get(metric_name)
    }
}

/// Result of a validation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Mean cross-entropy over the dataset.
    pub loss: f64,
    /// Metric values over the dataset.
    pub metrics: HashMap<String, f64>,
}

type ViewSource<'a> = Box<dyn Iterator<Item = TrainResult<(Vec<usize>, BatchViews)>> + 'a>;

/// Drives epochs and steps for an AugMix training run.
pub struct Trainer<M: Model> {
    config: TrainConfig,
    model: M,
    objective: JsdObjective,
    optimizer: SgdOptimizer,
    generator: Arc<BatchViewGenerator>,
    callbacks: CallbackList,
    metrics: MetricTracker,
    state: TrainingState,
    phase: TrainerPhase,
    history: TrainingHistory,
    stop: StopHandle,
    start_epoch: usize,
    scheduler_state: Option<HashMap<String, f64>>,
}

impl<M: Model> Trainer<M> {
    /// Validate `config` and build the objective, optimizer and view generator.
    pub fn new(config: TrainConfig, model: M) -> TrainResult<Self> {
        config.validate()?;

        let objective = JsdObjective::new(config.jsd_weight)?;
        let spec = if config.jsd_loss {
            Some(config.mixture_spec()?)
        } else {
            None
        };
        let generator =
            BatchViewGenerator::new(spec, config.jsd_loss)?.with_img_size(config.img_size);
        let optimizer = SgdOptimizer::new(OptimizerConfig {
            learning_rate: config.max_lr,
            momentum: config.momentum,
            nesterov: config.nesterov,
            weight_decay: config.weight_decay,
            ..Default::default()
        });

        Ok(Self {
            model,
            objective,
            optimizer,
            generator: Arc::new(generator),
            callbacks: CallbackList::new(),
            metrics: MetricTracker::new().with_metric(Box::new(Accuracy)),
            state: TrainingState {
                learning_rate: config.max_lr,
                ..Default::default()
            },
            phase: TrainerPhase::Idle,
            history: TrainingHistory::new(),
            stop: StopHandle::default(),
            start_epoch: 0,
            scheduler_state: None,
            config,
        })
    }

    /// Register a callback.
    pub fn with_callback(mut self, callback: Box<dyn Callback>) -> Self {
        self.callbacks.add(callback);
        self
    }

    /// Replace the callbacks.
    pub fn with_callbacks(mut self, callbacks: CallbackList) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Replace the validation metrics (accuracy by default).
    pub fn with_metrics(mut self, metrics: MetricTracker) -> Self {
        self.metrics = metrics;
        self
    }

    /// Handle for requesting a stop from another thread or a callback.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Current phase.
    pub fn phase(&self) -> &TrainerPhase {
        &self.phase
    }

    /// Current training state.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// History recorded so far.
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// The configuration the trainer was built with.
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// The model being trained.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Consume the trainer, returning the model.
    pub fn into_model(self) -> M {
        self.model
    }

    /// Restore a run from a checkpoint; the next `fit` continues after its epoch.
    pub fn resume_from(&mut self, checkpoint: &TrainingCheckpoint) -> TrainResult<()> {
        if self.phase != TrainerPhase::Idle {
            return Err(TrainError::ConfigError(
                "a checkpoint can only be restored before training starts".to_string(),
            ));
        }

        self.model.load_state_dict(checkpoint.parameters.clone())?;
        self.optimizer
            .load_state_dict(checkpoint.optimizer_state.clone());
        self.optimizer.set_lr(checkpoint.learning_rate);
        self.scheduler_state = checkpoint.scheduler_state.clone();
        self.history = checkpoint.history.clone();
        self.start_epoch = checkpoint.epoch + 1;
        self.state = TrainingState {
            epoch: checkpoint.epoch,
            step: checkpoint.step,
            train_loss: checkpoint.train_loss,
            val_loss: checkpoint.val_loss,
            learning_rate: checkpoint.learning_rate,
            ..Default::default()
        };

        tracing::info!(
            epoch = checkpoint.epoch,
            step = checkpoint.step,
            "restored training checkpoint"
        );
        Ok(())
    }

    /// Run training to completion, a stop request, or the first error.
    ///
    /// Each epoch ends with a validation pass on `validation`; with `None`
    /// that pass is skipped and the history holds no validation loss or
    /// metrics. Errors move the trainer to [`TrainerPhase::Failed`] and are
    /// returned. A trainer can be fitted only once.
    pub fn fit(
        &mut self,
        train: &Dataset,
        validation: Option<&Dataset>,
    ) -> TrainResult<TrainingHistory> {
        if self.phase != TrainerPhase::Idle {
            return Err(TrainError::ConfigError(format!(
                "fit requires an idle trainer, phase is {:?}",
                self.phase
            )));
        }

        match self.run(train, validation) {
            Ok(()) => Ok(self.history.clone()),
            Err(err) => {
                tracing::error!(error = %err, epoch = self.state.epoch, step = self.state.step, "training failed");
                self.phase = TrainerPhase::Failed(err.to_string());
                Err(err)
            }
        }
    }

    fn check_dataset(&self, dataset: &Dataset, role: &str) -> TrainResult<()> {
        let (height, width, _) = dataset.image_shape();
        if height != self.config.img_size || width != self.config.img_size {
            return Err(TrainError::ConfigError(format!(
                "{} images are {}x{}, expected img_size {}",
                role, height, width, self.config.img_size
            )));
        }
        if dataset.num_classes() != self.config.num_classes {
            return Err(TrainError::ConfigError(format!(
                "{} labels have {} classes, expected {}",
                role,
                dataset.num_classes(),
                self.config.num_classes
            )));
        }
        Ok(())
    }

    fn run(&mut self, train: &Dataset, validation: Option<&Dataset>) -> TrainResult<()> {
        if train.is_empty() {
            return Err(TrainError::ConfigError("training set is empty".to_string()));
        }
        self.check_dataset(train, "training")?;
        match validation {
            Some(validation) => self.check_dataset(validation, "validation")?,
            None => tracing::warn!("no validation set given, per-epoch validation is skipped"),
        }

        let mut batches = BatchIterator::new(
            train.num_samples(),
            BatchConfig {
                batch_size: self.config.batch_size,
                shuffle: true,
                drop_last: false,
                seed: self.config.seed,
            },
        )?;
        let total_steps = self.config.epochs * batches.num_batches();
        let mut schedule = LrSchedule::new(
            self.config.min_lr,
            self.config.max_lr,
            total_steps,
            self.config.lr_decay,
        )?;
        if let Some(state) = self.scheduler_state.take() {
            schedule.load_state_dict(&state)?;
        }
        self.optimizer.set_lr(schedule.get_lr());
        self.state.learning_rate = schedule.get_lr();

        tracing::info!(
            epochs = self.config.epochs,
            start_epoch = self.start_epoch,
            steps_per_epoch = batches.num_batches(),
            jsd_loss = self.config.jsd_loss,
            workers = self.config.num_workers,
            "training started"
        );
        self.callbacks.on_train_begin(&self.state)?;

        for epoch in self.start_epoch..self.config.epochs {
            self.state.epoch = epoch;
            self.state.batch = 0;
            self.phase = TrainerPhase::Running {
                epoch,
                step: self.state.step,
            };
            self.callbacks.on_epoch_begin(epoch, &self.state)?;

            batches.set_epoch(epoch as u64);
            let epoch_batches = batches.epoch_batches();
            let num_batches = epoch_batches.len();
            let source = self.view_source(train, epoch_batches, epoch)?;

            let mut loss_sum = 0.0;
            let mut consistency_sum = 0.0;
            let mut steps = 0usize;

            for item in source {
                let (indices, views) = item?;
                let breakdown = self.train_step(train, &indices, &views, &mut schedule)?;
                loss_sum += breakdown.total;
                consistency_sum += breakdown.consistency.unwrap_or(0.0);
                steps += 1;

                if self.stop.is_stop_requested() {
                    break;
                }
            }

            // A stop on the last batch still completes the epoch below.
            if steps < num_batches {
                return self.finish_stopped(epoch, "stop requested");
            }

            self.end_epoch(
                epoch,
                loss_sum / steps as f64,
                consistency_sum / steps as f64,
                validation,
                &schedule,
            )?;

            if self.callbacks.should_stop() || self.stop.is_stop_requested() {
                return self.finish_stopped(epoch, "stop requested at epoch end");
            }
        }

        self.callbacks.on_train_end(&self.state)?;
        self.phase = TrainerPhase::Finished;
        tracing::info!(
            epochs = self.history.len(),
            steps = self.state.step,
            "training finished"
        );
        Ok(())
    }

    /// Batches of one epoch, with their views, inline or from worker threads.
    fn view_source<'a>(
        &self,
        train: &'a Dataset,
        batch_indices: Vec<Vec<usize>>,
        epoch: usize,
    ) -> TrainResult<ViewSource<'a>> {
        let seed = self.config.seed.wrapping_add(epoch as u64);
        let generator = Arc::clone(&self.generator);

        if self.config.num_workers > 0 {
            let pipeline = PrefetchPipeline::spawn(
                train.shared_images(),
                batch_indices,
                generator,
                PrefetchConfig {
                    workers: self.config.num_workers,
                    depth: self.config.prefetch_depth,
                    seed,
                },
            )?;
            return Ok(Box::new(pipeline.map(|prepared| {
                prepared
                    .map(|batch| (batch.indices, batch.views))
                    .map_err(TrainError::from)
            })));
        }

        // Same stream a single prefetch worker would use.
        let mut rng = StdRng::seed_from_u64(worker_seed(seed, 0));
        let images = train.images();
        Ok(Box::new(batch_indices.into_iter().map(
            move |indices| -> TrainResult<(Vec<usize>, BatchViews)> {
                let batch = extract_images(&images, &indices)?;
                let views = generator.generate(&batch.view(), &mut rng)?;
                Ok((indices, views))
            },
        )))
    }

    fn train_step(
        &mut self,
        train: &Dataset,
        indices: &[usize],
        views: &BatchViews,
        schedule: &mut LrSchedule,
    ) -> TrainResult<LossBreakdown> {
        let batch = self.state.batch;
        self.phase = TrainerPhase::Running {
            epoch: self.state.epoch,
            step: self.state.step,
        };
        self.callbacks.on_batch_begin(batch, &self.state)?;

        let targets = train.targets(indices)?;
        let use_consistency = self.config.jsd_loss;
        let original = views.original().view();
        let pred_orig = self.model.forward(&original)?;

        let augmented = match views.augmented() {
            Some((view_a, view_b)) if use_consistency => {
                let (view_a, view_b) = (view_a.view(), view_b.view());
                let pred_a = self.model.forward(&view_a)?;
                let pred_b = self.model.forward(&view_b)?;
                Some((view_a, view_b, pred_a, pred_b))
            }
            _ => None,
        };
        let predictions = augmented
            .as_ref()
            .map(|(_, _, pred_a, pred_b)| (pred_a.view(), pred_b.view()));
        let prediction_refs = predictions.as_ref().map(|(a, b)| (a, b));

        let breakdown = self.objective.compute_loss(
            &pred_orig.view(),
            prediction_refs,
            &targets.view(),
            use_consistency,
        )?;
        let grads = self.objective.gradients(
            &pred_orig.view(),
            prediction_refs,
            &targets.view(),
            use_consistency,
        )?;

        let mut gradients = self.model.backward(&original, &grads.original.view())?;
        if let (Some((view_a, view_b, _, _)), Some(grad_a), Some(grad_b)) =
            (&augmented, &grads.view_a, &grads.view_b)
        {
            accumulate(&mut gradients, self.model.backward(view_a, &grad_a.view())?)?;
            accumulate(&mut gradients, self.model.backward(view_b, &grad_b.view())?)?;
        }

        self.optimizer
            .step(self.model.parameters_mut(), &gradients)?;
        schedule.step(&mut self.optimizer);

        self.state.step += 1;
        self.state.batch += 1;
        self.state.batch_loss = breakdown.total;
        self.state.learning_rate = schedule.get_lr();

        if self.state.step.is_multiple_of(self.config.log_frequency) {
            tracing::debug!(
                epoch = self.state.epoch,
                step = self.state.step,
                loss = breakdown.total,
                cross_entropy = breakdown.cross_entropy,
                consistency = breakdown.consistency,
                lr = self.state.learning_rate,
                "step"
            );
        }

        self.callbacks.on_batch_end(batch, &self.state)?;
        Ok(breakdown)
    }

    fn end_epoch(
        &mut self,
        epoch: usize,
        train_loss: f64,
        consistency: f64,
        validation: Option<&Dataset>,
        schedule: &LrSchedule,
    ) -> TrainResult<()> {
        self.state.train_loss = train_loss;
        self.history.train_loss.push(train_loss);
        if self.config.jsd_loss {
            self.history.consistency.push(consistency);
        }
        self.history.learning_rate.push(self.state.learning_rate);

        if let Some(validation) = validation {
            let evaluation = self.evaluate(validation)?;
            self.state.val_loss = Some(evaluation.loss);
            self.history.val_loss.push(evaluation.loss);
            for (name, value) in &evaluation.metrics {
                self.history
                    .metrics
                    .entry(name.clone())
                    .or_default()
                    .push(*value);
            }
            self.state.metrics = evaluation.metrics;
            self.callbacks.on_validation_end(&self.state)?;
        }

        tracing::info!(
            epoch,
            train_loss,
            val_loss = self.state.val_loss,
            accuracy = self.state.metrics.get("accuracy").copied(),
            lr = self.state.learning_rate,
            "epoch complete"
        );
        self.phase = TrainerPhase::EpochComplete { epoch };

        if !self.callbacks.is_empty() {
            let checkpoint = TrainingCheckpoint::capture(
                &self.state,
                &self.history,
                self.model.state_dict(),
                self.optimizer.state_dict(),
                Some(schedule.state_dict()),
            );
            self.callbacks.on_checkpoint(&checkpoint)?;
        }
        self.callbacks.on_epoch_end(epoch, &self.state)
    }

    fn finish_stopped(&mut self, epoch: usize, reason: &str) -> TrainResult<()> {
        tracing::warn!(epoch, step = self.state.step, reason, "training stopped early");
        self.phase = TrainerPhase::Stopped {
            epoch,
            step: self.state.step,
        };
        self.callbacks.on_train_end(&self.state)
    }

    /// Validation pass on clean images: mean cross-entropy plus metrics.
    pub fn evaluate(&mut self, dataset: &Dataset) -> TrainResult<Evaluation> {
        if dataset.is_empty() {
            return Err(TrainError::ConfigError("validation set is empty".to_string()));
        }

        let cross_entropy = self.objective.cross_entropy();
        let n = dataset.num_samples();
        let mut predictions = Array2::zeros((n, dataset.num_classes()));
        let mut loss_sum = 0.0;

        let indices: Vec<usize> = (0..n).collect();
        for (chunk_index, chunk) in indices.chunks(self.config.batch_size).enumerate() {
            let (images, targets, _) = dataset.batch(chunk)?;
            let probs = self.model.forward(&images.view())?;
            let loss = cross_entropy.compute(&probs.view(), &targets.view())?;
            loss_sum += loss * chunk.len() as f64;

            let start = chunk_index * self.config.batch_size;
            predictions
                .slice_mut(s![start..start + chunk.len(), ..])
                .assign(&probs);
        }

        let metrics = self
            .metrics
            .compute_all(&predictions.view(), &dataset.one_hot())?;
        Ok(Evaluation {
            loss: loss_sum / n as f64,
            metrics,
        })
    }
}

/// Add `grads` into `total`, parameter by parameter.
fn accumulate(
    total: &mut HashMap<String, Array<f64, Ix2>>,
    grads: HashMap<String, Array<f64, Ix2>>,
) -> TrainResult<()> {
    for (name, grad) in grads {
        match total.get_mut(&name) {
            Some(sum) if sum.shape() == grad.shape() => *sum += &grad,
            Some(sum) => {
                return Err(TrainError::ModelError(format!(
                    "gradient {} changed shape between views: {:?} vs {:?}",
                    name,
                    sum.shape(),
                    grad.shape()
                )))
            }
            None => {
                total.insert(name, grad);
            }
        }
    }
    Ok(())
}
