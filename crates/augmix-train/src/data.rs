//! Image classification datasets.
//!
//! A [`Dataset`] holds images in `[0, 1]` (`N × H × W × C`), integer labels
//! and their one-hot encoding. Images sit behind an `Arc` so prefetch
//! workers can read them without copying.

use crate::batch::{extract_images, extract_rows};
use crate::{TrainError, TrainResult};
use augmix_augment::validate_batch;
use scirs2_core::ndarray::{s, Array2, Array4, ArrayView2, ArrayView4, Axis};
use std::sync::Arc;

/// One-hot encode integer labels.
pub fn one_hot(labels: &[usize], num_classes: usize) -> TrainResult<Array2<f64>> {
    let mut encoded = Array2::zeros((labels.len(), num_classes));
    for (i, &label) in labels.iter().enumerate() {
        if label >= num_classes {
            return Err(TrainError::InvalidParameter(format!(
                "label {} at index {} out of range for {} classes",
                label, i, num_classes
            )));
        }
        encoded[[i, label]] = 1.0;
    }
    Ok(encoded)
}

/// Dataset container for image classification.
#[derive(Debug, Clone)]
pub struct Dataset {
    images: Arc<Array4<f64>>,
    labels: Vec<usize>,
    one_hot: Array2<f64>,
}

impl Dataset {
    /// Create a dataset from normalized images and integer labels.
    ///
    /// Fails if any value lies outside `[0, 1]`, if the label count differs
    /// from the image count, or if a label is out of range.
    pub fn new(images: Array4<f64>, labels: Vec<usize>, num_classes: usize) -> TrainResult<Self> {
        let n = images.len_of(Axis(0));
        if labels.len() != n {
            return Err(TrainError::InvalidParameter(format!(
                "{} images but {} labels",
                n,
                labels.len()
            )));
        }
        if n > 0 {
            validate_batch(&images.view(), None)?;
        }
        if let Some(bad) = images.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(TrainError::InvalidParameter(format!(
                "image values must lie in [0, 1], found {}",
                bad
            )));
        }

        let one_hot = one_hot(&labels, num_classes)?;
        Ok(Self {
            images: Arc::new(images),
            labels,
            one_hot,
        })
    }

    /// Create a dataset from 8-bit images, scaling by 1/255.
    pub fn from_u8(images: Array4<u8>, labels: Vec<usize>, num_classes: usize) -> TrainResult<Self> {
        Self::new(images.mapv(|v| f64::from(v) / 255.0), labels, num_classes)
    }

    /// Get number of samples.
    pub fn num_samples(&self) -> usize {
        self.labels.len()
    }

    /// Whether the dataset holds no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of classes in the one-hot encoding.
    pub fn num_classes(&self) -> usize {
        self.one_hot.ncols()
    }

    /// Shape of a single image as `(height, width, channels)`.
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let (_, h, w, c) = self.images.dim();
        (h, w, c)
    }

    /// All images.
    pub fn images(&self) -> ArrayView4<'_, f64> {
        self.images.view()
    }

    /// Shared handle to the images.
    pub fn shared_images(&self) -> Arc<Array4<f64>> {
        Arc::clone(&self.images)
    }

    /// Integer labels.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// One-hot labels.
    pub fn one_hot(&self) -> ArrayView2<'_, f64> {
        self.one_hot.view()
    }

    /// Images, one-hot labels and integer labels for the given rows.
    pub fn batch(&self, indices: &[usize]) -> TrainResult<(Array4<f64>, Array2<f64>, Vec<usize>)> {
        let images = extract_images(&self.images.view(), indices)?;
        let targets = extract_rows(&self.one_hot.view(), indices)?;
        let labels = indices.iter().map(|&i| self.labels[i]).collect();
        Ok((images, targets, labels))
    }

    /// One-hot labels for the given rows.
    pub fn targets(&self, indices: &[usize]) -> TrainResult<Array2<f64>> {
        extract_rows(&self.one_hot.view(), indices)
    }

    /// Get a subset of the dataset by indices.
    pub fn subset(&self, indices: &[usize]) -> TrainResult<Dataset> {
        let (images, one_hot, labels) = self.batch(indices)?;
        Ok(Self {
            images: Arc::new(images),
            labels,
            one_hot,
        })
    }

    /// Split into leading `train_ratio` and trailing remainder.
    pub fn train_test_split(&self, train_ratio: f64) -> TrainResult<(Dataset, Dataset)> {
        if !(0.0..=1.0).contains(&train_ratio) {
            return Err(TrainError::ConfigError(format!(
                "train_ratio must be in [0, 1], got {}",
                train_ratio
            )));
        }
        let n = self.num_samples();
        let cut = (n as f64 * train_ratio).round() as usize;

        let part = |range: std::ops::Range<usize>| Self {
            images: Arc::new(self.images.slice(s![range.clone(), .., .., ..]).to_owned()),
            labels: self.labels[range.clone()].to_vec(),
            one_hot: self.one_hot.slice(s![range, ..]).to_owned(),
        };
        Ok((part(0..cut), part(cut..n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(n: usize) -> Array4<f64> {
        Array4::from_shape_fn((n, 2, 2, 3), |(i, y, x, c)| {
            ((i + y + x + c) % 4) as f64 / 4.0
        })
    }

    #[test]
    fn test_one_hot() {
        let encoded = one_hot(&[2, 0], 3).unwrap();
        assert_eq!(encoded.row(0).to_vec(), vec![0.0, 0.0, 1.0]);
        assert_eq!(encoded.row(1).to_vec(), vec![1.0, 0.0, 0.0]);
        assert!(one_hot(&[3], 3).is_err());
    }

    #[test]
    fn test_dataset_creation() {
        let dataset = Dataset::new(images(4), vec![0, 1, 2, 1], 3).unwrap();
        assert_eq!(dataset.num_samples(), 4);
        assert_eq!(dataset.num_classes(), 3);
        assert_eq!(dataset.image_shape(), (2, 2, 3));
        assert_eq!(dataset.one_hot()[[3, 1]], 1.0);
    }

    #[test]
    fn test_dataset_validation() {
        assert!(Dataset::new(images(4), vec![0, 1], 3).is_err());
        assert!(Dataset::new(images(2), vec![0, 5], 3).is_err());

        let mut bad = images(2);
        bad[[0, 0, 0, 0]] = 1.5;
        assert!(Dataset::new(bad, vec![0, 1], 3).is_err());
    }

    #[test]
    fn test_from_u8_normalizes() {
        let raw = Array4::from_elem((1, 2, 2, 3), 255u8);
        let dataset = Dataset::from_u8(raw, vec![0], 2).unwrap();
        assert!(dataset.images().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_batch_and_subset() {
        let dataset = Dataset::new(images(4), vec![0, 1, 2, 1], 3).unwrap();
        let (imgs, targets, labels) = dataset.batch(&[3, 0]).unwrap();
        assert_eq!(imgs.shape(), &[2, 2, 2, 3]);
        assert_eq!(labels, vec![1, 0]);
        assert_eq!(targets[[0, 1]], 1.0);

        let subset = dataset.subset(&[2]).unwrap();
        assert_eq!(subset.labels(), &[2]);
        assert!(dataset.batch(&[9]).is_err());
    }

    #[test]
    fn test_train_test_split() {
        let dataset = Dataset::new(images(10), (0..10).map(|i| i % 3).collect(), 3).unwrap();
        let (train, test) = dataset.train_test_split(0.8).unwrap();
        assert_eq!(train.num_samples(), 8);
        assert_eq!(test.num_samples(), 2);
        assert_eq!(test.labels(), &[8 % 3, 9 % 3]);
        assert!(dataset.train_test_split(1.5).is_err());
    }
}
