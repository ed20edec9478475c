//! Bridge between the convolutional and the dense part of a network.

use super::r#trait::{layer_buffers, Layer};
use crate::error::Result;
use crate::tensor::{Shape, Tensor};
use crate::utils::SeededRng;

/// Reinterprets `channels × height × width` maps as one feature vector.
///
/// Both passes are plain copies, since the memory layout does not change.
#[derive(Debug, Clone)]
pub struct FlattenLayer {
    output: Tensor,
    delta: Tensor,
}

impl FlattenLayer {
    pub fn new() -> Self {
        Self {
            output: Tensor::zeros(0, Shape::Features(0)),
            delta: Tensor::zeros(0, Shape::Features(0)),
        }
    }
}

impl Default for FlattenLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for FlattenLayer {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        Ok(Shape::Features(input_shape.size()))
    }

    fn set_layer(
        &mut self,
        batch_size: usize,
        input_shape: Shape,
        _rng: &mut SeededRng,
    ) -> Result<()> {
        let shape = self.output_shape(input_shape)?;
        if self.output.shape() != shape {
            self.output = Tensor::zeros(batch_size, shape);
            self.delta = Tensor::zeros(batch_size, shape);
        }
        self.reset_batch(batch_size);
        Ok(())
    }

    fn reset_batch(&mut self, batch_size: usize) {
        self.output.resize_batch(batch_size);
        self.delta.resize_batch(batch_size);
    }

    fn forward(&mut self, input: &Tensor, _is_training: bool) {
        self.output.copy_from(input);
    }

    fn backward(&mut self, _input: &Tensor, prev_delta: Option<&mut Tensor>) {
        if let Some(prev_delta) = prev_delta {
            prev_delta.copy_from(&self.delta);
        }
    }

    fn zero_grad(&mut self) {
        self.delta.fill(0.0);
    }

    layer_buffers!();
}
