//! Background preparation of batch views.
//!
//! A [`PrefetchPipeline`] runs a small pool of worker threads that build
//! [`BatchViews`] ahead of the training loop and hand them over through a
//! bounded channel. Each worker owns its own random stream, so augmentations
//! are never correlated across workers.

use crate::views::{BatchViewGenerator, BatchViews};
use crate::{AugmentError, AugmentResult};
use scirs2_core::ndarray::{Array4, Axis};
use scirs2_core::random::{SeedableRng, StdRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchConfig {
    /// Number of worker threads (at least one).
    pub workers: usize,
    /// Channel capacity; prepared batches beyond this wait in the workers.
    pub depth: usize,
    /// Base seed; each worker derives its own stream from it.
    pub seed: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            depth: 2,
            seed: 0,
        }
    }
}

/// A batch ready for the training step.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    /// Position of the batch in the epoch's batch list.
    pub index: usize,
    /// Dataset rows in this batch.
    pub indices: Vec<usize>,
    /// Original and, when enabled, augmented views.
    pub views: BatchViews,
}

/// Seed for worker `worker` derived from the base seed.
pub fn worker_seed(seed: u64, worker: usize) -> u64 {
    seed ^ (worker as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Iterator over batches prepared by background workers.
///
/// Batches arrive in completion order; each one is yielded exactly once.
/// Dropping the pipeline stops the workers and joins them.
pub struct PrefetchPipeline {
    rx: Option<Receiver<AugmentResult<PreparedBatch>>>,
    handles: Vec<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    remaining: usize,
}

impl PrefetchPipeline {
    /// Start the workers.
    ///
    /// Worker `k` prepares the batches whose position is congruent to `k`
    /// modulo the worker count.
    pub fn spawn(
        images: Arc<Array4<f64>>,
        batches: Vec<Vec<usize>>,
        generator: Arc<BatchViewGenerator>,
        config: PrefetchConfig,
    ) -> AugmentResult<Self> {
        if config.workers == 0 {
            return Err(AugmentError::ConfigError(
                "prefetch requires at least one worker".to_string(),
            ));
        }

        let rows = images.len_of(Axis(0));
        if let Some(bad) = batches.iter().flatten().find(|&&idx| idx >= rows) {
            return Err(AugmentError::InvalidParameter(format!(
                "batch index {} out of range for {} images",
                bad, rows
            )));
        }

        let remaining = batches.len();
        let batches = Arc::new(batches);
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::sync_channel(config.depth.max(1));

        let mut handles = Vec::with_capacity(config.workers);
        for worker in 0..config.workers {
            let tx = tx.clone();
            let images = Arc::clone(&images);
            let batches = Arc::clone(&batches);
            let generator = Arc::clone(&generator);
            let stop = Arc::clone(&stop);
            let mut rng = StdRng::seed_from_u64(worker_seed(config.seed, worker));

            let handle = thread::Builder::new()
                .name(format!("augmix-prefetch-{}", worker))
                .spawn(move || {
                    for index in (worker..batches.len()).step_by(config.workers) {
                        if stop.load(Ordering::Relaxed) {
                            return;
                        }
                        let indices = batches[index].clone();
                        let batch = images.select(Axis(0), &indices);
                        let prepared = generator
                            .generate(&batch.view(), &mut rng)
                            .map(|views| PreparedBatch {
                                index,
                                indices,
                                views,
                            });
                        let failed = prepared.is_err();
                        if tx.send(prepared).is_err() || failed {
                            return;
                        }
                    }
                })
                .map_err(|e| AugmentError::WorkerError(e.to_string()))?;
            handles.push(handle);
        }

        tracing::debug!(
            workers = config.workers,
            depth = config.depth,
            batches = remaining,
            "prefetch pipeline started"
        );

        Ok(Self {
            rx: Some(rx),
            handles,
            stop,
            remaining,
        })
    }

    /// Batches not yet yielded.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl Iterator for PrefetchPipeline {
    type Item = AugmentResult<PreparedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.rx.as_ref()?.recv() {
            Ok(item) => {
                self.remaining -= 1;
                Some(item)
            }
            // All workers exited before delivering every batch.
            Err(_) => {
                self.remaining = 0;
                Some(Err(AugmentError::WorkerError(
                    "prefetch workers stopped early".to_string(),
                )))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl Drop for PrefetchPipeline {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Closing the receiver unblocks any worker waiting on a full channel.
        drop(self.rx.take());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::MixtureSpec;
    use std::collections::HashSet;

    fn images(n: usize) -> Arc<Array4<f64>> {
        Arc::new(Array4::from_shape_fn((n, 4, 4, 3), |(i, y, x, c)| {
            ((i + y + x + c) % 5) as f64 / 5.0
        }))
    }

    fn batches(n: usize, size: usize) -> Vec<Vec<usize>> {
        (0..n).collect::<Vec<_>>().chunks(size).map(|c| c.to_vec()).collect()
    }

    #[test]
    fn test_every_batch_exactly_once() {
        let generator = Arc::new(BatchViewGenerator::new(Some(MixtureSpec::default()), true).unwrap());
        let config = PrefetchConfig {
            workers: 3,
            depth: 1,
            seed: 7,
        };
        let pipeline =
            PrefetchPipeline::spawn(images(20), batches(20, 3), generator, config).unwrap();

        let mut seen = HashSet::new();
        let mut rows = 0;
        for prepared in pipeline {
            let prepared = prepared.unwrap();
            assert!(seen.insert(prepared.index));
            assert_eq!(prepared.views.len(), prepared.indices.len());
            assert!(prepared.views.augmented().is_some());
            rows += prepared.indices.len();
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(rows, 20);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let generator = Arc::new(BatchViewGenerator::new(None, false).unwrap());
        let config = PrefetchConfig {
            workers: 0,
            ..PrefetchConfig::default()
        };
        assert!(PrefetchPipeline::spawn(images(4), batches(4, 2), generator, config).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        let generator = Arc::new(BatchViewGenerator::new(None, false).unwrap());
        let result = PrefetchPipeline::spawn(
            images(4),
            vec![vec![0, 9]],
            generator,
            PrefetchConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_early_drop_joins_workers() {
        let generator = Arc::new(BatchViewGenerator::new(Some(MixtureSpec::default()), true).unwrap());
        let mut pipeline = PrefetchPipeline::spawn(
            images(40),
            batches(40, 2),
            generator,
            PrefetchConfig::default(),
        )
        .unwrap();

        assert!(pipeline.next().is_some());
        assert_eq!(pipeline.remaining(), 19);
        drop(pipeline);
    }

    #[test]
    fn test_worker_seeds_differ() {
        assert_ne!(worker_seed(0, 0), worker_seed(0, 1));
        assert_ne!(worker_seed(5, 0), worker_seed(6, 0));
    }
}
