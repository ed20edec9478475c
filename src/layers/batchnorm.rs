//! Batch normalization layer implementation
//!
//! This module provides a BatchNormLayer that normalizes activations per
//! channel, either over the batch (1D, after dense layers) or over the batch
//! and the spatial extent of each feature map (2D, after convolutions).
//!
//! # Batch Normalization Theory
//!
//! 1. Compute batch statistics: mean μ and biased variance σ² per channel
//! 2. Normalize: x̂ = (x - μ) / sqrt(σ² + ε)
//! 3. Scale and shift: y = γ · x̂ + β
//!
//! Training updates the running statistics with an exponential moving
//! average, `running = momentum · running + (1 - momentum) · batch`.
//! Inference normalizes with the running statistics instead.
//!
//! # References
//!
//! Ioffe, S., & Szegedy, C. (2015). Batch Normalization: Accelerating Deep Network Training
//! by Reducing Internal Covariate Shift. ICML.

use super::r#trait::{layer_buffers, Layer};
use crate::error::{NnError, Result};
use crate::optimizers::sgd_step;
use crate::tensor::{Shape, Tensor};
use crate::utils::SeededRng;

pub const DEFAULT_EPSILON: f32 = 1e-5;
pub const DEFAULT_MOMENTUM: f32 = 0.9;

/// Which axes the statistics are reduced over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchNormDim {
    /// Per feature, over the batch. Expects `Shape::Features`.
    OneD,
    /// Per channel, over the batch and every pixel. Expects `Shape::Image`.
    TwoD,
}

/// Batch normalization layer with learnable scale and shift parameters.
///
/// # Fields
///
/// * `epsilon` - Small constant for numerical stability (prevents division by zero)
/// * `momentum` - Momentum for updating running statistics
/// * `gamma` / `beta` - Learnable scale (starts at 1.0) and shift (starts at 0.0)
/// * `running_mean` / `running_var` - Inference statistics (start at 0.0)
///
/// # Example
///
/// ```
/// use rust_lenet::layers::{BatchNormLayer, Layer};
/// use rust_lenet::tensor::Shape;
/// use rust_lenet::utils::SeededRng;
///
/// let mut bn = BatchNormLayer::new_2d();
/// bn.set_layer(4, Shape::image(6, 28, 28), &mut SeededRng::new(1)).unwrap();
/// assert_eq!(bn.gamma(), &[1.0; 6]);
/// assert_eq!(bn.parameter_count(), 12); // 6 gamma + 6 beta
/// ```
#[derive(Debug, Clone)]
pub struct BatchNormLayer {
    dim: BatchNormDim,
    epsilon: f32,
    momentum: f32,
    channels: usize,
    spatial: usize,
    batch_size: usize,

    gamma: Vec<f32>,
    beta: Vec<f32>,
    running_mean: Vec<f32>,
    running_var: Vec<f32>,
    grad_gamma: Vec<f32>,
    grad_beta: Vec<f32>,

    // Cached by forward for backward.
    xhat: Vec<f32>,
    std: Vec<f32>,
    batch_stats: bool,

    output: Tensor,
    delta: Tensor,
}

impl BatchNormLayer {
    /// Creates a batch normalization layer with explicit hyperparameters.
    ///
    /// Fails with `InvalidConfiguration` unless `epsilon > 0` and
    /// `momentum` lies in `[0, 1]`.
    pub fn new(dim: BatchNormDim, epsilon: f32, momentum: f32) -> Result<Self> {
        if !(epsilon > 0.0) {
            return Err(NnError::config(format!(
                "batch norm epsilon must be positive, got {}",
                epsilon
            )));
        }
        if !(0.0..=1.0).contains(&momentum) {
            return Err(NnError::config(format!(
                "batch norm momentum must be in [0, 1], got {}",
                momentum
            )));
        }
        Ok(Self::unchecked(dim, epsilon, momentum))
    }

    fn unchecked(dim: BatchNormDim, epsilon: f32, momentum: f32) -> Self {
        Self {
            dim,
            epsilon,
            momentum,
            channels: 0,
            spatial: 0,
            batch_size: 0,
            gamma: Vec::new(),
            beta: Vec::new(),
            running_mean: Vec::new(),
            running_var: Vec::new(),
            grad_gamma: Vec::new(),
            grad_beta: Vec::new(),
            xhat: Vec::new(),
            std: Vec::new(),
            batch_stats: false,
            output: Tensor::zeros(0, Shape::Features(0)),
            delta: Tensor::zeros(0, Shape::Features(0)),
        }
    }

    /// 1D batch norm with `epsilon = 1e-5`, `momentum = 0.9`.
    pub fn new_1d() -> Self {
        Self::unchecked(BatchNormDim::OneD, DEFAULT_EPSILON, DEFAULT_MOMENTUM)
    }

    /// 2D batch norm with `epsilon = 1e-5`, `momentum = 0.9`.
    pub fn new_2d() -> Self {
        Self::unchecked(BatchNormDim::TwoD, DEFAULT_EPSILON, DEFAULT_MOMENTUM)
    }

    pub fn dim(&self) -> BatchNormDim {
        self.dim
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    /// Number of normalized channels (features for 1D).
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn gamma(&self) -> &[f32] {
        &self.gamma
    }

    pub fn gamma_mut(&mut self) -> &mut [f32] {
        &mut self.gamma
    }

    pub fn beta(&self) -> &[f32] {
        &self.beta
    }

    pub fn beta_mut(&mut self) -> &mut [f32] {
        &mut self.beta
    }

    pub fn running_mean(&self) -> &[f32] {
        &self.running_mean
    }

    pub fn running_var(&self) -> &[f32] {
        &self.running_var
    }

    pub fn grad_gamma(&self) -> &[f32] {
        &self.grad_gamma
    }

    pub fn grad_beta(&self) -> &[f32] {
        &self.grad_beta
    }

    /// Overwrites the inference statistics.
    pub fn set_running_stats(&mut self, mean: &[f32], var: &[f32]) -> Result<()> {
        if mean.len() != self.channels || var.len() != self.channels {
            return Err(NnError::shape(format!(
                "running stats need {} channels, got mean {} / var {}",
                self.channels,
                mean.len(),
                var.len()
            )));
        }
        self.running_mean.copy_from_slice(mean);
        self.running_var.copy_from_slice(var);
        Ok(())
    }

    #[inline]
    fn index(&self, n: usize, ch: usize, s: usize) -> usize {
        (n * self.channels + ch) * self.spatial + s
    }
}

impl Layer for BatchNormLayer {
    fn name(&self) -> &'static str {
        match self.dim {
            BatchNormDim::OneD => "batch_norm1d",
            BatchNormDim::TwoD => "batch_norm2d",
        }
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        match (self.dim, input_shape) {
            (BatchNormDim::OneD, Shape::Features(_)) | (BatchNormDim::TwoD, Shape::Image { .. }) => {
                Ok(input_shape)
            }
            (BatchNormDim::OneD, _) => Err(NnError::shape(format!(
                "batch_norm1d expects a feature vector, got {}",
                input_shape
            ))),
            (BatchNormDim::TwoD, _) => Err(NnError::shape(format!(
                "batch_norm2d expects feature maps, got {}",
                input_shape
            ))),
        }
    }

    fn set_layer(
        &mut self,
        batch_size: usize,
        input_shape: Shape,
        _rng: &mut SeededRng,
    ) -> Result<()> {
        let shape = self.output_shape(input_shape)?;
        let (channels, h, w) = shape.dims();
        if self.output.shape() != shape || self.gamma.len() != channels {
            self.channels = channels;
            self.spatial = h * w;
            self.gamma = vec![1.0f32; channels];
            self.beta = vec![0.0f32; channels];
            self.running_mean = vec![0.0f32; channels];
            self.running_var = vec![0.0f32; channels];
            self.grad_gamma = vec![0.0f32; channels];
            self.grad_beta = vec![0.0f32; channels];
            self.std = vec![0.0f32; channels];
            self.output = Tensor::zeros(batch_size, shape);
            self.delta = Tensor::zeros(batch_size, shape);
        }
        self.reset_batch(batch_size);
        Ok(())
    }

    fn reset_batch(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
        self.output.resize_batch(batch_size);
        self.delta.resize_batch(batch_size);
        self.xhat = vec![0.0f32; self.output.len()];
    }

    fn forward(&mut self, input: &Tensor, is_training: bool) {
        assert_eq!(
            input.len(),
            self.output.len(),
            "batch norm input len mismatch: expected {}, got {}",
            self.output.len(),
            input.len()
        );
        let x = input.as_slice();
        let m = (self.batch_size * self.spatial) as f32;
        self.batch_stats = is_training;

        for ch in 0..self.channels {
            let (mean, std) = if is_training {
                let mut sum = 0.0f32;
                for n in 0..self.batch_size {
                    for s in 0..self.spatial {
                        sum += x[self.index(n, ch, s)];
                    }
                }
                let mean = sum / m;
                let mut sq = 0.0f32;
                for n in 0..self.batch_size {
                    for s in 0..self.spatial {
                        let d = x[self.index(n, ch, s)] - mean;
                        sq += d * d;
                    }
                }
                let var = sq / m;
                self.running_mean[ch] =
                    self.momentum * self.running_mean[ch] + (1.0 - self.momentum) * mean;
                self.running_var[ch] =
                    self.momentum * self.running_var[ch] + (1.0 - self.momentum) * var;
                (mean, (var + self.epsilon).sqrt())
            } else {
                (
                    self.running_mean[ch],
                    (self.running_var[ch] + self.epsilon).sqrt(),
                )
            };
            self.std[ch] = std;

            let (g, b) = (self.gamma[ch], self.beta[ch]);
            for n in 0..self.batch_size {
                for s in 0..self.spatial {
                    let i = self.index(n, ch, s);
                    let xhat = (x[i] - mean) / std;
                    self.xhat[i] = xhat;
                    self.output.as_mut_slice()[i] = g * xhat + b;
                }
            }
        }
    }

    fn backward(&mut self, _input: &Tensor, prev_delta: Option<&mut Tensor>) {
        let delta = self.delta.as_slice();
        for ch in 0..self.channels {
            let mut dgamma = 0.0f32;
            let mut dbeta = 0.0f32;
            for n in 0..self.batch_size {
                for s in 0..self.spatial {
                    let i = (n * self.channels + ch) * self.spatial + s;
                    dgamma += self.xhat[i] * delta[i];
                    dbeta += delta[i];
                }
            }
            self.grad_gamma[ch] += dgamma;
            self.grad_beta[ch] += dbeta;
        }

        let Some(prev_delta) = prev_delta else {
            return;
        };
        assert_eq!(
            prev_delta.len(),
            delta.len(),
            "batch norm prev_delta len mismatch"
        );
        let prev = prev_delta.as_mut_slice();
        let m = (self.batch_size * self.spatial) as f32;

        for ch in 0..self.channels {
            let gamma = self.gamma[ch];
            let std = self.std[ch];
            if !self.batch_stats {
                // Running statistics are constants w.r.t. the input.
                for n in 0..self.batch_size {
                    for s in 0..self.spatial {
                        let i = self.index(n, ch, s);
                        prev[i] = delta[i] * gamma / std;
                    }
                }
                continue;
            }

            let mut sum1 = 0.0f32;
            let mut sum2 = 0.0f32;
            for n in 0..self.batch_size {
                for s in 0..self.spatial {
                    let i = self.index(n, ch, s);
                    let dxhat = delta[i] * gamma;
                    sum1 += dxhat;
                    sum2 += dxhat * self.xhat[i];
                }
            }
            let denom = m * std;
            for n in 0..self.batch_size {
                for s in 0..self.spatial {
                    let i = self.index(n, ch, s);
                    let dxhat = delta[i] * gamma;
                    prev[i] = (m * dxhat - sum1 - self.xhat[i] * sum2) / denom;
                }
            }
        }
    }

    fn update_parameters(&mut self, learning_rate: f32, weight_decay: f32) {
        let batch = self.batch_size;
        sgd_step(
            &mut self.gamma,
            &mut self.grad_gamma,
            learning_rate,
            weight_decay,
            batch,
        );
        sgd_step(
            &mut self.beta,
            &mut self.grad_beta,
            learning_rate,
            weight_decay,
            batch,
        );
    }

    fn zero_grad(&mut self) {
        self.delta.fill(0.0);
        self.grad_gamma.iter_mut().for_each(|g| *g = 0.0);
        self.grad_beta.iter_mut().for_each(|g| *g = 0.0);
    }

    layer_buffers!();

    /// `gamma`, `beta`, then the running statistics, which are saved with
    /// checkpoints but never trained.
    fn parameters(&self) -> Vec<&[f32]> {
        vec![
            self.gamma.as_slice(),
            self.beta.as_slice(),
            self.running_mean.as_slice(),
            self.running_var.as_slice(),
        ]
    }

    fn parameters_mut(&mut self) -> Vec<&mut [f32]> {
        vec![
            self.gamma.as_mut_slice(),
            self.beta.as_mut_slice(),
            self.running_mean.as_mut_slice(),
            self.running_var.as_mut_slice(),
        ]
    }

    fn gradients(&self) -> Vec<&[f32]> {
        vec![self.grad_gamma.as_slice(), self.grad_beta.as_slice()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn built(mut layer: BatchNormLayer, batch: usize, shape: Shape) -> BatchNormLayer {
        layer
            .set_layer(batch, shape, &mut SeededRng::new(0))
            .unwrap();
        layer
    }

    #[test]
    fn test_rejects_bad_hyperparameters() {
        assert!(BatchNormLayer::new(BatchNormDim::OneD, 0.0, 0.9).is_err());
        assert!(BatchNormLayer::new(BatchNormDim::OneD, 1e-5, 1.5).is_err());
        assert!(BatchNormLayer::new(BatchNormDim::TwoD, 1e-3, 0.99).is_ok());
    }

    #[test]
    fn test_dimension_checks() {
        let bn1 = BatchNormLayer::new_1d();
        assert!(bn1.output_shape(Shape::Features(10)).is_ok());
        assert!(bn1.output_shape(Shape::image(1, 2, 2)).is_err());
        let bn2 = BatchNormLayer::new_2d();
        assert!(bn2.output_shape(Shape::image(3, 4, 4)).is_ok());
        assert!(bn2.output_shape(Shape::Features(10)).is_err());
    }

    #[test]
    fn test_training_output_is_whitened() {
        let mut bn = built(BatchNormLayer::new_1d(), 4, Shape::Features(2));
        let input = Tensor::from_vec(
            4,
            Shape::Features(2),
            vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0],
        )
        .unwrap();
        bn.forward(&input, true);
        for ch in 0..2 {
            let col: Vec<f32> = (0..4).map(|n| bn.output().at(n, ch, 0, 0)).collect();
            let mean: f32 = col.iter().sum::<f32>() / 4.0;
            let var: f32 = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / 4.0;
            assert_relative_eq!(mean, 0.0, epsilon = 1e-5);
            assert_relative_eq!(var, 1.0, epsilon = 1e-3);
        }
        // running = 0.9 * 0 + 0.1 * batch
        assert_relative_eq!(bn.running_mean()[0], 0.25, epsilon = 1e-6);
        assert_relative_eq!(bn.running_var()[0], 0.125, epsilon = 1e-6);
    }

    #[test]
    fn test_2d_reduces_over_pixels() {
        let shape = Shape::image(2, 2, 2);
        let mut bn = built(BatchNormLayer::new_2d(), 1, shape);
        let input = Tensor::from_vec(
            1,
            shape,
            vec![0.0, 2.0, 0.0, 2.0, 5.0, 5.0, 5.0, 5.0],
        )
        .unwrap();
        bn.forward(&input, true);
        assert_relative_eq!(bn.running_mean()[0], 0.1, epsilon = 1e-6);
        assert_relative_eq!(bn.running_mean()[1], 0.5, epsilon = 1e-6);
        // channel 0 has mean 1, variance 1
        assert_relative_eq!(bn.output().at(0, 0, 0, 0), -1.0, epsilon = 1e-4);
        assert_relative_eq!(bn.output().at(0, 0, 0, 1), 1.0, epsilon = 1e-4);
        // constant channel collapses to beta
        assert!(bn.output().channel(0, 1).iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_eval_uses_running_stats() {
        let mut bn = built(BatchNormLayer::new_1d(), 2, Shape::Features(1));
        bn.set_running_stats(&[2.0], &[4.0 - DEFAULT_EPSILON]).unwrap();
        bn.gamma_mut()[0] = 3.0;
        bn.beta_mut()[0] = 1.0;
        let input = Tensor::from_vec(2, Shape::Features(1), vec![4.0, 0.0]).unwrap();
        bn.forward(&input, false);
        assert_relative_eq!(bn.output().as_slice()[0], 4.0, epsilon = 1e-5);
        assert_relative_eq!(bn.output().as_slice()[1], -2.0, epsilon = 1e-5);
        // running stats untouched in eval mode
        assert_eq!(bn.running_mean(), &[2.0]);
    }

    #[test]
    fn test_set_running_stats_checks_len() {
        let mut bn = built(BatchNormLayer::new_1d(), 2, Shape::Features(3));
        assert!(bn.set_running_stats(&[0.0; 2], &[1.0; 3]).is_err());
    }

    #[test]
    fn test_backward_of_uniform_delta_is_zero() {
        // A constant upstream gradient has no effect on a whitened output.
        let mut bn = built(BatchNormLayer::new_1d(), 3, Shape::Features(1));
        let input = Tensor::from_vec(3, Shape::Features(1), vec![1.0, 2.0, 6.0]).unwrap();
        bn.forward(&input, true);
        bn.delta_mut().fill(1.0);
        let mut prev = Tensor::zeros(3, Shape::Features(1));
        bn.backward(&input, Some(&mut prev));
        for &v in prev.as_slice() {
            assert!(v.abs() < 1e-5);
        }
        assert_relative_eq!(bn.grad_beta()[0], 3.0);
        assert!(bn.grad_gamma()[0].abs() < 1e-5);
    }
}
