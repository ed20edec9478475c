//! Layer trait definition for neural network layers
//!
//! This module defines the core Layer trait that all layer types must implement.
//! The trait provides a common interface for shape wiring, forward propagation,
//! backward propagation and parameter updates.

use crate::error::Result;
use crate::tensor::{Shape, Tensor};
use crate::utils::SeededRng;

/// Core trait for neural network layers.
///
/// Every layer owns two buffers sized `batch × output_shape`:
///
/// * `output` - written by [`Layer::forward`]
/// * `delta` - gradient of the loss w.r.t. `output`, written by the next
///   layer (or the loss) before [`Layer::backward`] runs
///
/// Parametric layers additionally own their weights and gradient
/// accumulators. Gradients are summed over the batch and only divided by the
/// batch size inside [`Layer::update_parameters`].
///
/// # Example
///
/// ```ignore
/// layer.set_layer(batch_size, input_shape, &mut rng)?;
/// layer.forward(&input, true);
/// layer.delta_mut().copy_from(&upstream_gradient);
/// layer.backward(&input, Some(&mut grad_input));
/// layer.update_parameters(0.01, 0.0);
/// ```
pub trait Layer: std::fmt::Debug {
    /// Short human-readable name (`"dense"`, `"conv2d"`, ...).
    fn name(&self) -> &'static str;

    /// Per-sample output shape produced for `input_shape`.
    ///
    /// Fails with `ShapeMismatch` / `InvalidConfiguration` when the layer
    /// cannot accept that input.
    fn output_shape(&self, input_shape: Shape) -> Result<Shape>;

    /// Allocates output/delta buffers and, for parametric layers, allocates
    /// and initializes weights.
    ///
    /// Calling it again with the same input shape keeps the weights and only
    /// resizes the batch-dependent buffers.
    fn set_layer(&mut self, batch_size: usize, input_shape: Shape, rng: &mut SeededRng)
        -> Result<()>;

    /// Resizes batch-dependent buffers after `set_layer`.
    fn reset_batch(&mut self, batch_size: usize);

    /// Computes `self.output` from `input`.
    ///
    /// Only batch normalization mutates state here (running statistics,
    /// when `is_training`).
    fn forward(&mut self, input: &Tensor, is_training: bool);

    /// Consumes `self.delta`, accumulates parameter gradients, and writes the
    /// gradient w.r.t. `input` into `prev_delta` when one is given.
    ///
    /// `prev_delta` is `None` for the first layer of a network.
    fn backward(&mut self, input: &Tensor, prev_delta: Option<&mut Tensor>);

    /// Applies decayed SGD and zeroes the gradient accumulators.
    fn update_parameters(&mut self, _learning_rate: f32, _weight_decay: f32) {}

    /// Zeroes `delta` and every gradient accumulator.
    fn zero_grad(&mut self);

    fn output(&self) -> &Tensor;

    fn delta(&self) -> &Tensor;

    fn delta_mut(&mut self) -> &mut Tensor;

    /// Output and delta borrowed together, so a successor can read the
    /// output while writing the delta.
    fn output_and_delta_mut(&mut self) -> (&Tensor, &mut Tensor);

    /// Parameter buffers in a stable order (used for checkpoints).
    fn parameters(&self) -> Vec<&[f32]> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut [f32]> {
        Vec::new()
    }

    /// Gradient accumulators matching the trainable prefix of
    /// [`Layer::parameters`].
    fn gradients(&self) -> Vec<&[f32]> {
        Vec::new()
    }

    /// Number of trainable scalars.
    fn parameter_count(&self) -> usize {
        self.gradients().iter().map(|g| g.len()).sum()
    }
}

/// Implements the buffer accessors of [`Layer`] for a struct with `output`
/// and `delta` tensor fields.
macro_rules! layer_buffers {
    () => {
        fn output(&self) -> &$crate::tensor::Tensor {
            &self.output
        }

        fn delta(&self) -> &$crate::tensor::Tensor {
            &self.delta
        }

        fn delta_mut(&mut self) -> &mut $crate::tensor::Tensor {
            &mut self.delta
        }

        fn output_and_delta_mut(
            &mut self,
        ) -> (&$crate::tensor::Tensor, &mut $crate::tensor::Tensor) {
            (&self.output, &mut self.delta)
        }
    };
}

pub(crate) use layer_buffers;
