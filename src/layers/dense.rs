//! Dense (fully connected) layer implementation
//!
//! This module provides a DenseLayer (also known as Linear or Fully Connected layer)
//! that performs the transformation: output = W · input + b for every sample.

use super::r#trait::{layer_buffers, Layer};
use crate::error::{NnError, Result};
use crate::optimizers::sgd_step;
use crate::tensor::{Shape, Tensor};
use crate::utils::gemm::{add_bias, sgemm_wrapper, sum_rows_into};
use crate::utils::{InitScheme, SeededRng};

/// Dense (fully connected) layer with weights and biases.
///
/// Performs the linear transformation `y = W x + b` per sample, where
/// `W` is `n_node × n_input` (row-major) and `b` has `n_node` entries.
/// Only accepts flat feature vectors; image tensors must pass through a
/// [`FlattenLayer`](super::FlattenLayer) first.
///
/// # Example
///
/// ```
/// use rust_lenet::layers::{DenseLayer, Layer};
/// use rust_lenet::tensor::Shape;
/// use rust_lenet::utils::{InitScheme, SeededRng};
///
/// let mut rng = SeededRng::new(42);
/// let mut layer = DenseLayer::new(784, 512, InitScheme::XavierUniform);
/// layer.set_layer(32, Shape::Features(784), &mut rng).unwrap();
/// assert_eq!(layer.parameter_count(), 784 * 512 + 512);
/// ```
#[derive(Debug, Clone)]
pub struct DenseLayer {
    n_input: usize,
    n_node: usize,
    init: InitScheme,
    batch_size: usize,
    initialized: bool,
    weights: Vec<f32>,
    biases: Vec<f32>,
    grad_weights: Vec<f32>,
    grad_biases: Vec<f32>,
    output: Tensor,
    delta: Tensor,
}

impl DenseLayer {
    /// Creates an unallocated dense layer; weights appear at `set_layer`.
    pub fn new(n_input: usize, n_node: usize, init: InitScheme) -> Self {
        Self {
            n_input,
            n_node,
            init,
            batch_size: 0,
            initialized: false,
            weights: Vec::new(),
            biases: Vec::new(),
            grad_weights: Vec::new(),
            grad_biases: Vec::new(),
            output: Tensor::zeros(0, Shape::Features(n_node)),
            delta: Tensor::zeros(0, Shape::Features(n_node)),
        }
    }

    /// Get the input size of the layer.
    pub fn input_size(&self) -> usize {
        self.n_input
    }

    /// Get the output size of the layer.
    pub fn output_size(&self) -> usize {
        self.n_node
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    pub fn biases_mut(&mut self) -> &mut [f32] {
        &mut self.biases
    }

    pub fn grad_weights(&self) -> &[f32] {
        &self.grad_weights
    }

    pub fn grad_biases(&self) -> &[f32] {
        &self.grad_biases
    }
}

impl Layer for DenseLayer {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        match input_shape {
            Shape::Features(n) if n == self.n_input => Ok(Shape::Features(self.n_node)),
            Shape::Features(n) => Err(NnError::shape(format!(
                "dense layer expects {} inputs, got {}",
                self.n_input, n
            ))),
            image => Err(NnError::shape(format!(
                "dense layer received image input {}; insert a flatten layer first",
                image
            ))),
        }
    }

    fn set_layer(
        &mut self,
        batch_size: usize,
        input_shape: Shape,
        rng: &mut SeededRng,
    ) -> Result<()> {
        let out_shape = self.output_shape(input_shape)?;
        self.reset_batch(batch_size);
        if self.initialized {
            return Ok(());
        }

        let weight_count = self.n_node * self.n_input;
        self.weights = vec![0.0f32; weight_count];
        self.init
            .fill(&mut self.weights, self.n_input, self.n_node, rng);
        self.biases = vec![0.0f32; self.n_node];
        self.grad_weights = vec![0.0f32; weight_count];
        self.grad_biases = vec![0.0f32; self.n_node];
        self.output = Tensor::zeros(batch_size, out_shape);
        self.delta = Tensor::zeros(batch_size, out_shape);
        self.initialized = true;
        Ok(())
    }

    fn reset_batch(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
        self.output.resize_batch(batch_size);
        self.delta.resize_batch(batch_size);
    }

    fn forward(&mut self, input: &Tensor, _is_training: bool) {
        let batch = self.batch_size;
        assert_eq!(
            input.len(),
            batch * self.n_input,
            "dense input len mismatch: expected {}, got {}",
            batch * self.n_input,
            input.len()
        );

        // output (batch × n_node) = input (batch × n_input) · Wᵀ
        let out = self.output.as_mut_slice();
        sgemm_wrapper(
            batch,
            self.n_node,
            self.n_input,
            input.as_slice(),
            self.n_input,
            &self.weights,
            self.n_input,
            out,
            self.n_node,
            false,
            true,
            1.0,
            0.0,
        );
        add_bias(out, batch, self.n_node, &self.biases);
    }

    fn backward(&mut self, input: &Tensor, prev_delta: Option<&mut Tensor>) {
        let batch = self.batch_size;
        let delta = self.delta.as_slice();

        // dW (n_node × n_input) += deltaᵀ · input
        sgemm_wrapper(
            self.n_node,
            self.n_input,
            batch,
            delta,
            self.n_node,
            input.as_slice(),
            self.n_input,
            &mut self.grad_weights,
            self.n_input,
            true,
            false,
            1.0,
            1.0,
        );
        sum_rows_into(delta, batch, self.n_node, &mut self.grad_biases);

        if let Some(prev_delta) = prev_delta {
            assert_eq!(
                prev_delta.len(),
                batch * self.n_input,
                "dense prev_delta len mismatch"
            );
            // prev_delta (batch × n_input) = delta · W
            sgemm_wrapper(
                batch,
                self.n_input,
                self.n_node,
                delta,
                self.n_node,
                &self.weights,
                self.n_input,
                prev_delta.as_mut_slice(),
                self.n_input,
                false,
                false,
                1.0,
                0.0,
            );
        }
    }

    fn update_parameters(&mut self, learning_rate: f32, weight_decay: f32) {
        let batch = self.batch_size;
        sgd_step(
            &mut self.weights,
            &mut self.grad_weights,
            learning_rate,
            weight_decay,
            batch,
        );
        sgd_step(
            &mut self.biases,
            &mut self.grad_biases,
            learning_rate,
            weight_decay,
            batch,
        );
    }

    fn zero_grad(&mut self) {
        self.delta.fill(0.0);
        self.grad_weights.iter_mut().for_each(|g| *g = 0.0);
        self.grad_biases.iter_mut().for_each(|g| *g = 0.0);
    }

    layer_buffers!();

    fn parameters(&self) -> Vec<&[f32]> {
        vec![self.weights.as_slice(), self.biases.as_slice()]
    }

    fn parameters_mut(&mut self) -> Vec<&mut [f32]> {
        vec![self.weights.as_mut_slice(), self.biases.as_mut_slice()]
    }

    fn gradients(&self) -> Vec<&[f32]> {
        vec![self.grad_weights.as_slice(), self.grad_biases.as_slice()]
    }

    fn parameter_count(&self) -> usize {
        self.n_node * self.n_input + self.n_node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built(n_in: usize, n_out: usize, batch: usize, seed: u64) -> DenseLayer {
        let mut rng = SeededRng::new(seed);
        let mut layer = DenseLayer::new(n_in, n_out, InitScheme::XavierUniform);
        layer
            .set_layer(batch, Shape::Features(n_in), &mut rng)
            .unwrap();
        layer
    }

    #[test]
    fn test_dense_layer_creation() {
        let layer = built(10, 5, 4, 42);
        assert_eq!(layer.input_size(), 10);
        assert_eq!(layer.output_size(), 5);
        assert_eq!(layer.weights.len(), 50); // 5 × 10
        assert_eq!(layer.biases.len(), 5);
        assert_eq!(layer.output().batch(), 4);
    }

    #[test]
    fn test_dense_layer_parameter_count() {
        let layer = DenseLayer::new(784, 512, InitScheme::LecunUniform);
        // 784 × 512 weights + 512 biases = 401,408 + 512 = 401,920
        assert_eq!(layer.parameter_count(), 784 * 512 + 512);
    }

    #[test]
    fn test_xavier_initialization() {
        let layer = built(100, 50, 1, 42);
        let limit = (6.0f32 / 150.0).sqrt();
        for &weight in &layer.weights {
            assert!(
                weight >= -limit && weight <= limit,
                "Weight {} outside Xavier range [{}, {}]",
                weight,
                -limit,
                limit
            );
        }
        assert!(layer.biases.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_deterministic_initialization() {
        let layer1 = built(10, 5, 2, 42);
        let layer2 = built(10, 5, 2, 42);
        assert_eq!(layer1.weights, layer2.weights);
    }

    #[test]
    fn test_set_layer_is_idempotent() {
        let mut rng = SeededRng::new(1);
        let mut layer = DenseLayer::new(3, 2, InitScheme::Normal);
        layer.set_layer(4, Shape::Features(3), &mut rng).unwrap();
        let weights = layer.weights.clone();
        layer.set_layer(8, Shape::Features(3), &mut rng).unwrap();
        assert_eq!(layer.weights, weights);
        assert_eq!(layer.output().batch(), 8);
    }

    #[test]
    fn test_rejects_wrong_input() {
        let mut rng = SeededRng::new(1);
        let mut layer = DenseLayer::new(400, 120, InitScheme::Normal);
        assert!(matches!(
            layer.set_layer(1, Shape::Features(256), &mut rng),
            Err(NnError::ShapeMismatch(_))
        ));
        assert!(matches!(
            layer.set_layer(1, Shape::image(16, 5, 5), &mut rng),
            Err(NnError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_forward_batch_rows_independent() {
        let mut layer = built(2, 2, 2, 3);
        layer.weights_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        layer.biases_mut().copy_from_slice(&[0.5, -0.5]);
        let input = Tensor::from_vec(2, Shape::Features(2), vec![1.0, 1.0, 2.0, 0.0]).unwrap();
        layer.forward(&input, true);
        assert_eq!(layer.output().as_slice(), &[3.5, 6.5, 2.5, 5.5]);
    }
}
