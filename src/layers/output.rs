//! Terminal loss layer.
//!
//! The output layer sits after the last regular layer of the chain. Its
//! `output` holds the network predictions; [`OutputLayer::compute_loss`]
//! compares them with the labels and seeds `delta` with `p - onehot(label)`,
//! which `backward` hands to the last regular layer.

use super::r#trait::{layer_buffers, Layer};
use crate::error::{NnError, Result};
use crate::tensor::{Shape, Tensor};
use crate::utils::SeededRng;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// `-ln p[label]`; pair with a softmax activation.
    #[default]
    #[serde(alias = "cross entropy")]
    CrossEntropy,
    /// `0.5 Σ (p - onehot)²`
    #[serde(alias = "MSE")]
    Mse,
}

impl LossKind {
    pub fn name(&self) -> &'static str {
        match self {
            LossKind::CrossEntropy => "cross_entropy",
            LossKind::Mse => "mse",
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossKind {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cross_entropy" | "cross-entropy" | "cross entropy" => Ok(LossKind::CrossEntropy),
            "mse" | "MSE" => Ok(LossKind::Mse),
            other => Err(NnError::config(format!(
                "unknown loss '{}' (expected cross_entropy or mse)",
                other
            ))),
        }
    }
}

/// One-hot encoding of `label` over `n_classes`.
pub fn one_hot(label: usize, n_classes: usize) -> Result<Vec<f32>> {
    if label >= n_classes {
        return Err(NnError::config(format!(
            "label {} outside [0, {})",
            label, n_classes
        )));
    }
    let mut encoded = vec![0.0f32; n_classes];
    encoded[label] = 1.0;
    Ok(encoded)
}

/// Loss layer terminating the chain.
#[derive(Debug, Clone)]
pub struct OutputLayer {
    loss: LossKind,
    n_classes: usize,
    batch_size: usize,
    output: Tensor,
    delta: Tensor,
}

impl OutputLayer {
    pub fn new(loss: LossKind) -> Self {
        Self {
            loss,
            n_classes: 0,
            batch_size: 0,
            output: Tensor::zeros(0, Shape::Features(0)),
            delta: Tensor::zeros(0, Shape::Features(0)),
        }
    }

    pub fn loss_kind(&self) -> LossKind {
        self.loss
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn check_labels(&self, labels: &[usize]) -> Result<()> {
        if labels.len() != self.batch_size {
            return Err(NnError::shape(format!(
                "expected {} labels, got {}",
                self.batch_size,
                labels.len()
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= self.n_classes) {
            return Err(NnError::config(format!(
                "label {} outside [0, {})",
                bad, self.n_classes
            )));
        }
        Ok(())
    }

    /// Mean loss of the current predictions, leaving `delta` untouched.
    pub fn loss(&self, labels: &[usize]) -> Result<f32> {
        self.check_labels(labels)?;
        if self.batch_size == 0 {
            return Ok(0.0);
        }
        let total: f32 = labels
            .iter()
            .enumerate()
            .map(|(n, &label)| {
                let p = self.output.sample(n);
                match self.loss {
                    LossKind::CrossEntropy => -p[label].ln(),
                    LossKind::Mse => p
                        .iter()
                        .enumerate()
                        .map(|(i, &v)| {
                            let d = if i == label { v - 1.0 } else { v };
                            0.5 * d * d
                        })
                        .sum(),
                }
            })
            .sum();
        Ok(total / self.batch_size as f32)
    }

    /// Mean loss of the current predictions; also writes
    /// `delta = p - onehot(label)` for every sample.
    pub fn compute_loss(&mut self, labels: &[usize]) -> Result<f32> {
        let loss = self.loss(labels)?;
        self.delta.copy_from(&self.output);
        for (n, &label) in labels.iter().enumerate() {
            self.delta.sample_mut(n)[label] -= 1.0;
        }
        Ok(loss)
    }

    /// Predicted class per sample.
    pub fn predictions(&self) -> Vec<usize> {
        self.output.argmax_rows()
    }
}

impl Layer for OutputLayer {
    fn name(&self) -> &'static str {
        "output"
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        match input_shape {
            Shape::Features(n) if n > 0 => Ok(input_shape),
            _ => Err(NnError::shape(format!(
                "output layer needs a non-empty feature vector, got {}",
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
        if self.output.shape() != shape {
            self.n_classes = shape.size();
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn built(loss: LossKind, batch: usize, classes: usize) -> OutputLayer {
        let mut layer = OutputLayer::new(loss);
        layer
            .set_layer(batch, Shape::Features(classes), &mut SeededRng::new(0))
            .unwrap();
        layer
    }

    #[test]
    fn test_one_hot() {
        assert_eq!(one_hot(2, 4).unwrap(), vec![0.0, 0.0, 1.0, 0.0]);
        assert!(matches!(
            one_hot(4, 4),
            Err(NnError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_cross_entropy_loss_and_delta() {
        let mut layer = built(LossKind::CrossEntropy, 2, 3);
        let probs =
            Tensor::from_vec(2, Shape::Features(3), vec![0.7, 0.2, 0.1, 0.25, 0.25, 0.5]).unwrap();
        layer.forward(&probs, true);
        let loss = layer.compute_loss(&[0, 2]).unwrap();
        let expected = (-(0.7f32).ln() - (0.5f32).ln()) / 2.0;
        assert_relative_eq!(loss, expected, epsilon = 1e-6);
        let d = layer.delta().as_slice();
        assert_relative_eq!(d[0], -0.3, epsilon = 1e-6);
        assert_relative_eq!(d[1], 0.2, epsilon = 1e-6);
        assert_relative_eq!(d[5], -0.5, epsilon = 1e-6);
        assert_eq!(layer.predictions(), vec![0, 2]);
    }

    #[test]
    fn test_mse_loss() {
        let mut layer = built(LossKind::Mse, 1, 2);
        let out = Tensor::from_vec(1, Shape::Features(2), vec![0.5, 0.5]).unwrap();
        layer.forward(&out, true);
        // 0.5 * (0.25 + 0.25)
        assert_relative_eq!(layer.compute_loss(&[1]).unwrap(), 0.25, epsilon = 1e-6);
        assert_eq!(layer.delta().as_slice(), &[0.5, -0.5]);
    }

    #[test]
    fn test_rejects_bad_labels() {
        let layer = built(LossKind::Mse, 2, 10);
        assert!(matches!(
            layer.loss(&[1]),
            Err(NnError::ShapeMismatch(_))
        ));
        assert!(matches!(
            layer.loss(&[1, 10]),
            Err(NnError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_parse_loss() {
        assert_eq!(
            "cross_entropy".parse::<LossKind>().unwrap(),
            LossKind::CrossEntropy
        );
        assert_eq!("mse".parse::<LossKind>().unwrap(), LossKind::Mse);
        assert!("hinge".parse::<LossKind>().is_err());
    }
}
