//! Owning, contiguous tensor used for layer outputs and deltas.
//!
//! A [`Tensor`] is a batch of samples that all share one [`Shape`]. Storage is
//! a single row-major `Vec<f32>` laid out as `batch × channels × height × width`
//! (or `batch × features`), so one sample is always a contiguous slice.

use crate::error::{NnError, Result};
use std::fmt;

/// Per-sample shape of the data flowing between layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Flat feature vector (dense side of the network).
    Features(usize),
    /// Stack of 2D feature maps (convolutional side of the network).
    Image {
        channels: usize,
        height: usize,
        width: usize,
    },
}

impl Shape {
    pub fn image(channels: usize, height: usize, width: usize) -> Self {
        Shape::Image {
            channels,
            height,
            width,
        }
    }

    /// Number of scalars in one sample.
    pub fn size(&self) -> usize {
        match *self {
            Shape::Features(n) => n,
            Shape::Image {
                channels,
                height,
                width,
            } => channels * height * width,
        }
    }

    /// `(channels, height, width)`, treating a feature vector as `n × 1 × 1`.
    pub fn dims(&self) -> (usize, usize, usize) {
        match *self {
            Shape::Features(n) => (n, 1, 1),
            Shape::Image {
                channels,
                height,
                width,
            } => (channels, height, width),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Features(n) => write!(f, "[{}]", n),
            Shape::Image {
                channels,
                height,
                width,
            } => write!(f, "[{}, {}, {}]", channels, height, width),
        }
    }
}

/// Batch of samples with a common [`Shape`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    batch: usize,
    shape: Shape,
    data: Vec<f32>,
}

impl Tensor {
    /// Zero-filled tensor.
    pub fn zeros(batch: usize, shape: Shape) -> Self {
        Self {
            batch,
            shape,
            data: vec![0.0f32; batch * shape.size()],
        }
    }

    /// Wraps existing storage, failing if the element count disagrees with
    /// `batch × shape`.
    pub fn from_vec(batch: usize, shape: Shape, data: Vec<f32>) -> Result<Self> {
        let expected = batch * shape.size();
        if data.len() != expected {
            return Err(NnError::shape(format!(
                "tensor of {} samples with shape {} needs {} values, got {}",
                batch,
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { batch, shape, data })
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Total number of scalars.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Contiguous view of sample `n`.
    pub fn sample(&self, n: usize) -> &[f32] {
        let size = self.shape.size();
        &self.data[n * size..(n + 1) * size]
    }

    pub fn sample_mut(&mut self, n: usize) -> &mut [f32] {
        let size = self.shape.size();
        &mut self.data[n * size..(n + 1) * size]
    }

    /// Feature map `c` of sample `n` (`height × width` values).
    pub fn channel(&self, n: usize, c: usize) -> &[f32] {
        let (channels, h, w) = self.shape.dims();
        let start = (n * channels + c) * h * w;
        &self.data[start..start + h * w]
    }

    /// Element `(n, c, i, j)`; feature vectors use `c` as the feature index.
    pub fn at(&self, n: usize, c: usize, i: usize, j: usize) -> f32 {
        self.data[self.offset(n, c, i, j)]
    }

    pub fn at_mut(&mut self, n: usize, c: usize, i: usize, j: usize) -> &mut f32 {
        let idx = self.offset(n, c, i, j);
        &mut self.data[idx]
    }

    fn offset(&self, n: usize, c: usize, i: usize, j: usize) -> usize {
        let (channels, h, w) = self.shape.dims();
        assert!(
            n < self.batch && c < channels && i < h && j < w,
            "index ({}, {}, {}, {}) out of bounds for {} × {}",
            n,
            c,
            i,
            j,
            self.batch,
            self.shape
        );
        j + w * (i + h * (c + channels * n))
    }

    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    /// Changes the batch size, keeping the per-sample shape. Existing
    /// contents are discarded.
    pub fn resize_batch(&mut self, batch: usize) {
        if batch != self.batch {
            self.batch = batch;
            self.data = vec![0.0f32; batch * self.shape.size()];
        } else {
            self.fill(0.0);
        }
    }

    /// Copies values from `other`, which must have the same element count.
    pub fn copy_from(&mut self, other: &Tensor) {
        assert_eq!(
            self.data.len(),
            other.data.len(),
            "copy_from length mismatch: {} vs {}",
            self.data.len(),
            other.data.len()
        );
        self.data.copy_from_slice(&other.data);
    }

    /// Index of the largest value in each sample (first one on ties).
    pub fn argmax_rows(&self) -> Vec<usize> {
        (0..self.batch)
            .map(|n| {
                let row = self.sample(n);
                let mut best = 0;
                for (i, &v) in row.iter().enumerate().skip(1) {
                    if v > row[best] {
                        best = i;
                    }
                }
                best
            })
            .collect()
    }
}
