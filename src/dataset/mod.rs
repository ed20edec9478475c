//! In-memory datasets and mini-batch partitioning.

pub mod mnist;

pub use mnist::{load_mnist, MnistSplit, Normalization};

use crate::error::{NnError, Result};
use crate::tensor::{Shape, Tensor};
use crate::utils::SeededRng;

/// Samples of one shape stored back to back, with a class label each.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    images: Vec<f32>,
    labels: Vec<usize>,
    shape: Shape,
}

impl Dataset {
    /// Fails with `ShapeMismatch` when `images` does not hold exactly
    /// `labels.len()` samples of `shape`.
    pub fn new(images: Vec<f32>, labels: Vec<usize>, shape: Shape) -> Result<Self> {
        if images.len() != labels.len() * shape.size() {
            return Err(NnError::shape(format!(
                "{} labels of shape {} need {} values, got {}",
                labels.len(),
                shape,
                labels.len() * shape.size(),
                images.len()
            )));
        }
        Ok(Self {
            images,
            labels,
            shape,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn images(&self) -> &[f32] {
        &self.images
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn sample(&self, index: usize) -> &[f32] {
        let size = self.shape.size();
        &self.images[index * size..(index + 1) * size]
    }

    /// Keeps the first `n` samples.
    pub fn truncate(&mut self, n: usize) {
        if n < self.len() {
            self.labels.truncate(n);
            self.images.truncate(n * self.shape.size());
        }
    }

    /// Gathers the samples at `indices` into one batch tensor.
    pub fn batch(&self, indices: &[usize]) -> Result<(Tensor, Vec<usize>)> {
        let size = self.shape.size();
        let mut data = Vec::with_capacity(indices.len() * size);
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            if i >= self.len() {
                return Err(NnError::shape(format!(
                    "sample index {} out of range for {} samples",
                    i,
                    self.len()
                )));
            }
            data.extend_from_slice(self.sample(i));
            labels.push(self.labels[i]);
        }
        Ok((Tensor::from_vec(indices.len(), self.shape, data)?, labels))
    }
}

/// Partition of `0..n` into equal-size mini-batches.
///
/// The `n % batch_size` samples left over are not part of any batch for
/// this epoch; with shuffling, a different remainder is dropped each time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchIndices {
    batches: Vec<Vec<usize>>,
    dropped: usize,
}

impl BatchIndices {
    pub fn generate(n: usize, batch_size: usize, shuffle: bool, rng: &mut SeededRng) -> Self {
        if batch_size == 0 {
            return Self {
                batches: Vec::new(),
                dropped: n,
            };
        }
        let mut order: Vec<usize> = (0..n).collect();
        if shuffle {
            rng.shuffle_usize(&mut order);
        }
        let batches: Vec<Vec<usize>> = order
            .chunks_exact(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        Self {
            batches,
            dropped: n % batch_size,
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Samples left out of this epoch.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.batches.iter().map(|b| b.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy(n: usize) -> Dataset {
        let images = (0..n * 2).map(|v| v as f32).collect();
        Dataset::new(images, (0..n).map(|i| i % 3).collect(), Shape::Features(2)).unwrap()
    }

    #[test]
    fn test_dataset_len_check() {
        assert!(Dataset::new(vec![0.0; 5], vec![0, 1], Shape::Features(2)).is_err());
        assert_eq!(toy(4).len(), 4);
    }

    #[test]
    fn test_batch_gathers_rows() {
        let data = toy(5);
        let (x, y) = data.batch(&[3, 0]).unwrap();
        assert_eq!(x.batch(), 2);
        assert_eq!(x.as_slice(), &[6.0, 7.0, 0.0, 1.0]);
        assert_eq!(y, vec![0, 0]);
        assert!(data.batch(&[5]).is_err());
    }

    #[test]
    fn test_batch_indices_drop_remainder() {
        let mut rng = SeededRng::new(3);
        let batches = BatchIndices::generate(10, 3, false, &mut rng);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches.dropped(), 1);
        let flat: Vec<usize> = batches.iter().flatten().copied().collect();
        assert_eq!(flat, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffled_indices_are_unique() {
        let mut rng = SeededRng::new(11);
        let batches = BatchIndices::generate(100, 8, true, &mut rng);
        assert_eq!(batches.len(), 12);
        let mut flat: Vec<usize> = batches.iter().flatten().copied().collect();
        assert_eq!(flat.len(), 96);
        flat.sort_unstable();
        flat.dedup();
        assert_eq!(flat.len(), 96);
        assert!(flat.iter().all(|&i| i < 100));
    }

    #[test]
    fn test_truncate() {
        let mut data = toy(6);
        data.truncate(2);
        assert_eq!(data.len(), 2);
        assert_eq!(data.images().len(), 4);
    }
}
