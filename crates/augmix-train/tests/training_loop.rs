//! End-to-end tests for the training loop.
//!
//! These tests run the trainer on a tiny synthetic two-class dataset and
//! check the lifecycle, the schedule, cancellation and checkpoint resume.

use approx::assert_abs_diff_eq;
use augmix_train::{
    rate_at, Callback, CheckpointCallback, Dataset, JsdObjective, Model, SoftmaxClassifier,
    StopHandle, TrainConfig, TrainError, TrainResult, Trainer, TrainerPhase, TrainingCheckpoint,
    TrainingState,
};
use scirs2_core::ndarray::{Array2, Array4};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

const IMG: usize = 6;

fn config() -> TrainConfig {
    TrainConfig {
        epochs: 2,
        batch_size: 4,
        img_size: IMG,
        num_classes: 2,
        max_lr: 0.1,
        min_lr: 1e-3,
        width: 2,
        depth: -1,
        seed: 7,
        ..Default::default()
    }
}

fn dataset(n: usize) -> Dataset {
    let images = Array4::from_shape_fn((n, IMG, IMG, 3), |(i, y, x, c)| {
        let class_base = if i % 2 == 0 { 0.15 } else { 0.75 };
        class_base + 0.02 * ((i + y * 3 + x + c) % 5) as f64
    });
    Dataset::new(images, (0..n).map(|i| i % 2).collect(), 2).unwrap()
}

fn model() -> SoftmaxClassifier {
    SoftmaxClassifier::new(IMG, 3, 2, 7).unwrap()
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("augmix_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[derive(Default)]
struct Counts {
    validations: usize,
    epochs_ended: usize,
    batches: usize,
    train_ended: bool,
}

struct Counter(Rc<RefCell<Counts>>);

impl Callback for Counter {
    fn on_validation_end(&mut self, _state: &TrainingState) -> TrainResult<()> {
        self.0.borrow_mut().validations += 1;
        Ok(())
    }

    fn on_epoch_end(&mut self, _epoch: usize, _state: &TrainingState) -> TrainResult<()> {
        self.0.borrow_mut().epochs_ended += 1;
        Ok(())
    }

    fn on_batch_end(&mut self, _batch: usize, _state: &TrainingState) -> TrainResult<()> {
        self.0.borrow_mut().batches += 1;
        Ok(())
    }

    fn on_train_end(&mut self, _state: &TrainingState) -> TrainResult<()> {
        self.0.borrow_mut().train_ended = true;
        Ok(())
    }
}

#[test]
fn test_single_epoch_runs_one_validation_pass() -> Result<(), TrainError> {
    let counts = Rc::new(RefCell::new(Counts::default()));
    let config = TrainConfig {
        epochs: 1,
        ..config()
    };
    let mut trainer =
        Trainer::new(config, model())?.with_callback(Box::new(Counter(counts.clone())));
    let data = dataset(10);

    let history = trainer.fit(&data, Some(&data))?;

    assert_eq!(trainer.phase(), &TrainerPhase::Finished);
    let counts = counts.borrow();
    assert_eq!(counts.validations, 1);
    assert_eq!(counts.epochs_ended, 1);
    assert_eq!(counts.batches, 3);
    assert!(counts.train_ended);
    assert_eq!(history.val_loss.len(), 1);
    assert!(history.train_loss[0].is_finite());
    Ok(())
}

#[test]
fn test_schedule_over_ten_epoch_run() -> Result<(), TrainError> {
    let total = 10;
    assert_abs_diff_eq!(rate_at(0, total, 1e-5, 1.0)?, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(rate_at(total, total, 1e-5, 1.0)?, 1e-5, epsilon = 1e-12);

    let mut previous = f64::INFINITY;
    for progress in 0..=total {
        let lr = rate_at(progress, total, 1e-5, 1.0)?;
        assert!((1e-5..=1.0).contains(&lr));
        assert!(lr <= previous);
        previous = lr;
    }
    Ok(())
}

#[test]
fn test_trainer_reaches_min_lr_on_last_step() -> Result<(), TrainError> {
    let config = TrainConfig {
        min_lr: 1e-5,
        max_lr: 1.0,
        ..config()
    };
    let mut trainer = Trainer::new(config, model())?;
    let history = trainer.fit(&dataset(8), None)?;

    assert_eq!(trainer.state().step, 4);
    assert_abs_diff_eq!(trainer.state().learning_rate, 1e-5, epsilon = 1e-12);
    assert!(history.learning_rate[0] > history.learning_rate[1]);
    Ok(())
}

#[test]
fn test_consistency_never_lowers_the_loss() -> Result<(), TrainError> {
    let objective = JsdObjective::default();
    let labels = Array2::from_shape_fn((3, 4), |(i, j)| if i == j { 1.0 } else { 0.0 });
    let orig = Array2::from_shape_fn((3, 4), |(i, j)| if i == j { 0.7 } else { 0.1 });
    let view_a = Array2::from_elem((3, 4), 0.25);
    let view_b = Array2::from_shape_fn((3, 4), |(_, j)| if j == 3 { 0.4 } else { 0.2 });

    let plain = objective.compute_loss(&orig.view(), None, &labels.view(), false)?;
    let with_jsd = objective.compute_loss(
        &orig.view(),
        Some((&view_a.view(), &view_b.view())),
        &labels.view(),
        true,
    )?;
    assert!(with_jsd.total > plain.total);
    assert_abs_diff_eq!(with_jsd.cross_entropy, plain.total, epsilon = 1e-12);

    let same = objective.compute_loss(
        &orig.view(),
        Some((&orig.view(), &orig.view())),
        &labels.view(),
        true,
    )?;
    assert_eq!(same.total, plain.total);
    Ok(())
}

#[test]
fn test_single_view_training() -> Result<(), TrainError> {
    let config = TrainConfig {
        jsd_loss: false,
        width: 0,
        ..config()
    };
    let mut trainer = Trainer::new(config, model())?;
    let history = trainer.fit(&dataset(8), None)?;

    assert_eq!(trainer.phase(), &TrainerPhase::Finished);
    assert!(history.consistency.is_empty());
    assert!(history.val_loss.is_empty());
    assert!(history.metrics.is_empty());
    Ok(())
}

struct FailingCheckpoint;

impl Callback for FailingCheckpoint {
    fn on_checkpoint(&mut self, _checkpoint: &TrainingCheckpoint) -> TrainResult<()> {
        Err(TrainError::CollaboratorError("tracking server unreachable".to_string()))
    }
}

#[test]
fn test_collaborator_failure_moves_to_failed() -> Result<(), TrainError> {
    let mut trainer = Trainer::new(config(), model())?.with_callback(Box::new(FailingCheckpoint));

    let err = trainer.fit(&dataset(8), None).unwrap_err();

    assert!(err.is_collaborator());
    match trainer.phase() {
        TrainerPhase::Failed(message) => assert!(message.contains("tracking server")),
        other => panic!("unexpected phase {:?}", other),
    }
    assert_eq!(trainer.history().len(), 1);
    Ok(())
}

struct StopOnFirstBatch(StopHandle);

impl Callback for StopOnFirstBatch {
    fn on_batch_end(&mut self, _batch: usize, _state: &TrainingState) -> TrainResult<()> {
        self.0.request_stop();
        Ok(())
    }
}

#[test]
fn test_stop_request_finishes_current_step() -> Result<(), TrainError> {
    let trainer = Trainer::new(config(), model())?;
    let handle = trainer.stop_handle();
    let mut trainer = trainer.with_callback(Box::new(StopOnFirstBatch(handle)));
    let before = trainer.model().parameters().clone();

    trainer.fit(&dataset(12), None)?;

    assert_eq!(trainer.phase(), &TrainerPhase::Stopped { epoch: 0, step: 1 });
    assert_eq!(trainer.state().step, 1);
    assert!(trainer.history().is_empty());
    assert_ne!(trainer.model().parameters(), &before);
    Ok(())
}

struct StopAfterBatch {
    handle: StopHandle,
    batch: usize,
    checkpoints: Rc<RefCell<Vec<usize>>>,
}

impl Callback for StopAfterBatch {
    fn on_batch_end(&mut self, batch: usize, _state: &TrainingState) -> TrainResult<()> {
        if batch == self.batch {
            self.handle.request_stop();
        }
        Ok(())
    }

    fn on_checkpoint(&mut self, checkpoint: &TrainingCheckpoint) -> TrainResult<()> {
        self.checkpoints.borrow_mut().push(checkpoint.epoch);
        Ok(())
    }
}

#[test]
fn test_stop_on_last_batch_keeps_completed_epoch() -> Result<(), TrainError> {
    let checkpoints = Rc::new(RefCell::new(Vec::new()));
    let trainer = Trainer::new(config(), model())?;
    let handle = trainer.stop_handle();
    let mut trainer = trainer.with_callback(Box::new(StopAfterBatch {
        handle,
        batch: 1,
        checkpoints: checkpoints.clone(),
    }));
    let data = dataset(8);

    let history = trainer.fit(&data, Some(&data))?;

    assert_eq!(trainer.phase(), &TrainerPhase::Stopped { epoch: 0, step: 2 });
    assert_eq!(history.len(), 1);
    assert_eq!(history.val_loss.len(), 1);
    assert_eq!(*checkpoints.borrow(), vec![0]);
    Ok(())
}

#[test]
fn test_stop_mid_epoch_skips_epoch_end() -> Result<(), TrainError> {
    let checkpoints = Rc::new(RefCell::new(Vec::new()));
    let trainer = Trainer::new(config(), model())?;
    let handle = trainer.stop_handle();
    let mut trainer = trainer.with_callback(Box::new(StopAfterBatch {
        handle,
        batch: 0,
        checkpoints: checkpoints.clone(),
    }));
    let data = dataset(8);

    let history = trainer.fit(&data, Some(&data))?;

    assert_eq!(trainer.phase(), &TrainerPhase::Stopped { epoch: 0, step: 1 });
    assert!(history.is_empty());
    assert!(checkpoints.borrow().is_empty());
    Ok(())
}

#[test]
fn test_prefetch_worker_matches_inline_generation() -> Result<(), TrainError> {
    let data = dataset(10);

    let mut inline = Trainer::new(config(), model())?;
    inline.fit(&data, None)?;

    let prefetch_config = TrainConfig {
        num_workers: 1,
        prefetch_depth: 1,
        ..config()
    };
    let mut prefetched = Trainer::new(prefetch_config, model())?;
    prefetched.fit(&data, None)?;

    assert_eq!(inline.history().train_loss, prefetched.history().train_loss);
    assert_eq!(inline.model().parameters(), prefetched.model().parameters());
    Ok(())
}

#[test]
fn test_multiple_workers_consume_every_batch() -> Result<(), TrainError> {
    let counts = Rc::new(RefCell::new(Counts::default()));
    let config = TrainConfig {
        num_workers: 3,
        ..config()
    };
    let mut trainer =
        Trainer::new(config, model())?.with_callback(Box::new(Counter(counts.clone())));
    trainer.fit(&dataset(18), None)?;

    assert_eq!(trainer.phase(), &TrainerPhase::Finished);
    assert_eq!(counts.borrow().batches, 10);
    Ok(())
}

#[test]
fn test_resume_from_checkpoint_matches_uninterrupted_run() -> Result<(), TrainError> {
    let dir = temp_dir("resume");
    let data = dataset(10);

    let mut full = Trainer::new(config(), model())?
        .with_callback(Box::new(CheckpointCallback::new(&dir, 1, false)));
    full.fit(&data, Some(&data))?;

    let checkpoint = TrainingCheckpoint::load(&dir.join("checkpoint_epoch_0.json"))?;
    assert_eq!(checkpoint.epoch, 0);
    assert_eq!(checkpoint.history.len(), 1);

    let mut resumed = Trainer::new(config(), model())?;
    resumed.resume_from(&checkpoint)?;
    let history = resumed.fit(&data, Some(&data))?;

    assert_eq!(history.len(), 2);
    assert_eq!(resumed.state().step, full.state().step);
    for (name, param) in full.model().parameters() {
        let restored = &resumed.model().parameters()[name];
        for (a, b) in param.iter().zip(restored.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[test]
fn test_resume_after_fit_is_rejected() -> Result<(), TrainError> {
    let mut trainer = Trainer::new(config(), model())?;
    let data = dataset(8);
    trainer.fit(&data, None)?;

    let checkpoint = TrainingCheckpoint::capture(
        trainer.state(),
        trainer.history(),
        trainer.model().state_dict(),
        Default::default(),
        None,
    );
    assert!(trainer.resume_from(&checkpoint).is_err());
    Ok(())
}

#[test]
fn test_dataset_mismatch_is_configuration_error() -> Result<(), TrainError> {
    let config = TrainConfig {
        num_classes: 3,
        ..config()
    };
    let model = SoftmaxClassifier::new(IMG, 3, 3, 0)?;
    let mut trainer = Trainer::new(config, model)?;

    let err = trainer.fit(&dataset(8), None).unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(trainer.phase(), TrainerPhase::Failed(_)));
    Ok(())
}
