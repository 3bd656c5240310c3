//! Batch management.

use crate::{TrainError, TrainResult};
use scirs2_core::ndarray::{Array, Array4, ArrayView, ArrayView4, Axis, Ix2};
use scirs2_core::random::{SeedableRng, StdRng};

/// Configuration for batch processing.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Batch size.
    pub batch_size: usize,
    /// Whether to shuffle data every epoch.
    pub shuffle: bool,
    /// Whether to drop last incomplete batch.
    pub drop_last: bool,
    /// Seed for shuffling; epoch `e` shuffles with `seed + e`.
    pub seed: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            drop_last: false,
            seed: 0,
        }
    }
}

/// Iterator over batch indices for one epoch at a time.
#[derive(Debug, Clone)]
pub struct BatchIterator {
    config: BatchConfig,
    num_samples: usize,
    current_batch: usize,
    epoch: u64,
    indices: Vec<usize>,
}

impl BatchIterator {
    /// Create a new batch iterator positioned at epoch 0.
    pub fn new(num_samples: usize, config: BatchConfig) -> TrainResult<Self> {
        if config.batch_size == 0 {
            return Err(TrainError::BatchError("batch_size must be at least 1".to_string()));
        }

        let mut iter = Self {
            config,
            num_samples,
            current_batch: 0,
            epoch: 0,
            indices: (0..num_samples).collect(),
        };
        iter.shuffle();
        Ok(iter)
    }

    fn shuffle(&mut self) {
        if !self.config.shuffle {
            return;
        }
        self.indices = (0..self.num_samples).collect();
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(self.epoch));
        for i in (1..self.indices.len()).rev() {
            let j = rng.random_range(0..=i);
            self.indices.swap(i, j);
        }
    }

    /// Get the next batch indices.
    pub fn next_batch(&mut self) -> Option<Vec<usize>> {
        let start = self.current_batch * self.config.batch_size;
        if start >= self.num_samples {
            return None;
        }
        let end = (start + self.config.batch_size).min(self.num_samples);

        if self.config.drop_last && end - start < self.config.batch_size {
            return None;
        }

        self.current_batch += 1;
        Some(self.indices[start..end].to_vec())
    }

    /// Move to the next epoch and reshuffle.
    pub fn reset(&mut self) {
        self.current_batch = 0;
        self.epoch += 1;
        self.shuffle();
    }

    /// Jump to `epoch`, reshuffling as [`reset`](Self::reset) would have.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.current_batch = 0;
        self.epoch = epoch;
        self.shuffle();
    }

    /// Every batch of the current epoch, in order.
    pub fn epoch_batches(&self) -> Vec<Vec<usize>> {
        let mut batches: Vec<Vec<usize>> = self
            .indices
            .chunks(self.config.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        if self.config.drop_last
            && batches
                .last()
                .is_some_and(|b| b.len() < self.config.batch_size)
        {
            batches.pop();
        }
        batches
    }

    /// Get total number of batches.
    pub fn num_batches(&self) -> usize {
        if self.config.drop_last {
            self.num_samples / self.config.batch_size
        } else {
            self.num_samples.div_ceil(self.config.batch_size)
        }
    }
}

impl Iterator for BatchIterator {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}

/// Gather rows of a matrix.
pub fn extract_rows(data: &ArrayView<f64, Ix2>, indices: &[usize]) -> TrainResult<Array<f64, Ix2>> {
    check_indices(indices, data.nrows())?;
    Ok(data.select(Axis(0), indices))
}

/// Gather images of a batch.
pub fn extract_images(images: &ArrayView4<f64>, indices: &[usize]) -> TrainResult<Array4<f64>> {
    check_indices(indices, images.len_of(Axis(0)))?;
    Ok(images.select(Axis(0), indices))
}

fn check_indices(indices: &[usize], rows: usize) -> TrainResult<()> {
    if let Some(&idx) = indices.iter().find(|&&idx| idx >= rows) {
        return Err(TrainError::BatchError(format!(
            "Index {} out of bounds for data with {} rows",
            idx, rows
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scirs2_core::ndarray::array;

    #[test]
    fn test_batches_cover_every_sample_once() {
        let config = BatchConfig {
            batch_size: 4,
            seed: 3,
            ..Default::default()
        };
        let iter = BatchIterator::new(10, config).unwrap();
        assert_eq!(iter.num_batches(), 3);

        let mut seen: Vec<usize> = iter.flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_last() {
        let config = BatchConfig {
            batch_size: 4,
            drop_last: true,
            ..Default::default()
        };
        let iter = BatchIterator::new(10, config).unwrap();
        assert_eq!(iter.num_batches(), 2);
        assert_eq!(iter.epoch_batches().len(), 2);
        assert_eq!(iter.count(), 2);
    }

    #[test]
    fn test_no_shuffle_keeps_order() {
        let config = BatchConfig {
            batch_size: 3,
            shuffle: false,
            ..Default::default()
        };
        let mut iter = BatchIterator::new(5, config).unwrap();
        assert_eq!(iter.next_batch(), Some(vec![0, 1, 2]));
        assert_eq!(iter.next_batch(), Some(vec![3, 4]));
        assert_eq!(iter.next_batch(), None);
    }

    #[test]
    fn test_reset_reshuffles_deterministically() {
        let config = BatchConfig {
            batch_size: 50,
            seed: 11,
            ..Default::default()
        };
        let mut a = BatchIterator::new(50, config.clone()).unwrap();
        let mut b = BatchIterator::new(50, config).unwrap();

        let first = a.epoch_batches();
        a.reset();
        b.reset();
        assert_eq!(a.epoch_batches(), b.epoch_batches());
        assert_ne!(a.epoch_batches(), first);

        let config = BatchConfig {
            batch_size: 50,
            seed: 11,
            ..Default::default()
        };
        let mut c = BatchIterator::new(50, config).unwrap();
        c.set_epoch(1);
        assert_eq!(c.epoch_batches(), a.epoch_batches());
    }

    #[test]
    fn test_zero_batch_size_is_error() {
        let config = BatchConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(BatchIterator::new(5, config).is_err());
    }

    #[test]
    fn test_extract_rows() {
        let data = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let batch = extract_rows(&data.view(), &[2, 0]).unwrap();
        assert_eq!(batch, array![[5.0, 6.0], [1.0, 2.0]]);
        assert!(extract_rows(&data.view(), &[3]).is_err());
    }

    #[test]
    fn test_extract_images() {
        let images = Array4::from_shape_fn((3, 2, 2, 1), |(n, _, _, _)| n as f64);
        let batch = extract_images(&images.view(), &[1]).unwrap();
        assert_eq!(batch.shape(), &[1, 2, 2, 1]);
        assert_eq!(batch[[0, 1, 1, 0]], 1.0);
        assert!(extract_images(&images.view(), &[5]).is_err());
    }
}
