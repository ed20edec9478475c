//! Elementwise activations and the row-wise softmax as standalone layers.

use super::r#trait::{layer_buffers, Layer};
use crate::error::{NnError, Result};
use crate::tensor::{Shape, Tensor};
use crate::utils::activations::{relu_derivative, sigmoid_derivative, tanh_derivative};
use crate::utils::{relu, sigmoid, softmax_rows, tanh, SeededRng};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Tanh,
    #[default]
    Relu,
    Sigmoid,
    Softmax,
}

impl ActivationKind {
    pub const ALL: [ActivationKind; 4] = [
        ActivationKind::Tanh,
        ActivationKind::Relu,
        ActivationKind::Sigmoid,
        ActivationKind::Softmax,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActivationKind::Tanh => "tanh",
            ActivationKind::Relu => "relu",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Softmax => "softmax",
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActivationKind {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivationKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                NnError::config(format!(
                    "unknown activation '{}' (expected tanh, relu, sigmoid or softmax)",
                    s
                ))
            })
    }
}

/// Parameter-free activation layer; the output shape equals the input shape.
///
/// Softmax normalizes each sample over its features and only accepts flat
/// inputs (or `c × 1 × 1` images). Its backward pass copies `delta` through
/// unchanged: it is meant to sit directly before a cross-entropy output,
/// which already hands back `p - onehot`.
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    kind: ActivationKind,
    shape: Option<Shape>,
    batch_size: usize,
    output: Tensor,
    delta: Tensor,
}

impl ActivationLayer {
    pub fn new(kind: ActivationKind) -> Self {
        Self {
            kind,
            shape: None,
            batch_size: 0,
            output: Tensor::zeros(0, Shape::Features(0)),
            delta: Tensor::zeros(0, Shape::Features(0)),
        }
    }

    pub fn tanh() -> Self {
        Self::new(ActivationKind::Tanh)
    }

    pub fn relu() -> Self {
        Self::new(ActivationKind::Relu)
    }

    pub fn sigmoid() -> Self {
        Self::new(ActivationKind::Sigmoid)
    }

    pub fn softmax() -> Self {
        Self::new(ActivationKind::Softmax)
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }
}

impl Layer for ActivationLayer {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        if self.kind == ActivationKind::Softmax {
            if let Shape::Image { height, width, .. } = input_shape {
                if height > 1 || width > 1 {
                    return Err(NnError::config(format!(
                        "softmax over 2D feature maps is not supported (input {})",
                        input_shape
                    )));
                }
            }
        }
        Ok(input_shape)
    }

    fn set_layer(
        &mut self,
        batch_size: usize,
        input_shape: Shape,
        _rng: &mut SeededRng,
    ) -> Result<()> {
        let out_shape = self.output_shape(input_shape)?;
        if self.shape != Some(out_shape) {
            self.shape = Some(out_shape);
            self.output = Tensor::zeros(batch_size, out_shape);
            self.delta = Tensor::zeros(batch_size, out_shape);
        }
        self.reset_batch(batch_size);
        Ok(())
    }

    fn reset_batch(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
        self.output.resize_batch(batch_size);
        self.delta.resize_batch(batch_size);
    }

    fn forward(&mut self, input: &Tensor, _is_training: bool) {
        assert_eq!(
            input.len(),
            self.output.len(),
            "{} input len mismatch",
            self.kind
        );
        let x = input.as_slice();
        let y = self.output.as_mut_slice();
        match self.kind {
            ActivationKind::Tanh => y.iter_mut().zip(x).for_each(|(o, &v)| *o = tanh(v)),
            ActivationKind::Relu => y.iter_mut().zip(x).for_each(|(o, &v)| *o = relu(v)),
            ActivationKind::Sigmoid => y.iter_mut().zip(x).for_each(|(o, &v)| *o = sigmoid(v)),
            ActivationKind::Softmax => {
                let cols = self.shape.map_or(0, |s| s.size());
                softmax_rows(x, y, cols);
            }
        }
    }

    fn backward(&mut self, input: &Tensor, prev_delta: Option<&mut Tensor>) {
        let Some(prev_delta) = prev_delta else {
            return;
        };
        assert_eq!(
            prev_delta.len(),
            self.delta.len(),
            "{} prev_delta len mismatch",
            self.kind
        );
        let prev = prev_delta.as_mut_slice();
        let delta = self.delta.as_slice();
        let y = self.output.as_slice();
        match self.kind {
            ActivationKind::Tanh => {
                for ((p, &d), &out) in prev.iter_mut().zip(delta).zip(y) {
                    *p = d * tanh_derivative(out);
                }
            }
            ActivationKind::Relu => {
                for ((p, &d), &x) in prev.iter_mut().zip(delta).zip(input.as_slice()) {
                    *p = d * relu_derivative(x);
                }
            }
            ActivationKind::Sigmoid => {
                for ((p, &d), &out) in prev.iter_mut().zip(delta).zip(y) {
                    *p = d * sigmoid_derivative(out);
                }
            }
            ActivationKind::Softmax => prev.copy_from_slice(delta),
        }
    }

    fn zero_grad(&mut self) {
        self.delta.fill(0.0);
    }

    layer_buffers!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::RELU_GRAD_AT_ZERO;
    use approx::assert_relative_eq;

    fn built(kind: ActivationKind, batch: usize, shape: Shape) -> ActivationLayer {
        let mut layer = ActivationLayer::new(kind);
        let mut rng = SeededRng::new(0);
        layer.set_layer(batch, shape, &mut rng).unwrap();
        layer
    }

    #[test]
    fn test_relu_forward_backward() {
        let mut layer = built(ActivationKind::Relu, 1, Shape::Features(3));
        let input = Tensor::from_vec(1, Shape::Features(3), vec![-1.0, 0.0, 2.0]).unwrap();
        layer.forward(&input, true);
        assert_eq!(layer.output().as_slice(), &[0.0, 0.0, 2.0]);

        layer.delta_mut().fill(5.0);
        let mut prev = Tensor::zeros(1, Shape::Features(3));
        layer.backward(&input, Some(&mut prev));
        assert_eq!(prev.as_slice(), &[0.0, 5.0 * RELU_GRAD_AT_ZERO, 5.0]);
    }

    #[test]
    fn test_tanh_keeps_image_shape() {
        let shape = Shape::image(2, 3, 3);
        let mut layer = built(ActivationKind::Tanh, 2, shape);
        assert_eq!(layer.output().shape(), shape);
        let input = Tensor::zeros(2, shape);
        layer.forward(&input, true);
        assert!(layer.output().as_slice().iter().all(|&v| v == 0.0));

        layer.delta_mut().fill(1.0);
        let mut prev = Tensor::zeros(2, shape);
        layer.backward(&input, Some(&mut prev));
        assert!(prev.as_slice().iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let mut layer = built(ActivationKind::Softmax, 2, Shape::Features(4));
        let input = Tensor::from_vec(
            2,
            Shape::Features(4),
            vec![1.0, 2.0, 3.0, 4.0, 1000.0, 1000.0, 1000.0, 1000.0],
        )
        .unwrap();
        layer.forward(&input, false);
        for n in 0..2 {
            let sum: f32 = layer.output().sample(n).iter().sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
        }
        assert_relative_eq!(layer.output().at(1, 0, 0, 0), 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_softmax_rejects_feature_maps() {
        let layer = ActivationLayer::softmax();
        assert!(matches!(
            layer.output_shape(Shape::image(3, 2, 2)),
            Err(NnError::InvalidConfiguration(_))
        ));
        assert!(layer.output_shape(Shape::image(10, 1, 1)).is_ok());
    }

    #[test]
    fn test_softmax_backward_is_copy() {
        let mut layer = built(ActivationKind::Softmax, 1, Shape::Features(3));
        let input = Tensor::zeros(1, Shape::Features(3));
        layer.forward(&input, true);
        layer
            .delta_mut()
            .as_mut_slice()
            .copy_from_slice(&[0.3, -0.6, 0.3]);
        let mut prev = Tensor::zeros(1, Shape::Features(3));
        layer.backward(&input, Some(&mut prev));
        assert_eq!(prev.as_slice(), &[0.3, -0.6, 0.3]);
    }

    #[test]
    fn test_parse() {
        assert_eq!("tanh".parse::<ActivationKind>().unwrap(), ActivationKind::Tanh);
        assert!("gelu".parse::<ActivationKind>().is_err());
    }
}
