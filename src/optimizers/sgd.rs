//! Stochastic Gradient Descent with L2 weight decay.
//!
//! Layers accumulate raw gradient sums over a mini-batch; the update divides
//! by the batch size and shrinks the weights by the decay term:
//!
//! `w = (1 - 2·η·λ / batch) · w - (η / batch) · Σ∂L/∂w`

use crate::error::{NnError, Result};

/// Plain SGD configuration. Stateless across steps.
///
/// # Example
///
/// ```
/// use rust_lenet::optimizers::Sgd;
///
/// let sgd = Sgd::new(0.01, 0.0).unwrap();
/// assert_eq!(sgd.learning_rate(), 0.01);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    learning_rate: f32,
    weight_decay: f32,
}

impl Sgd {
    /// Creates an optimizer, rejecting non-positive learning rates and
    /// negative decay.
    pub fn new(learning_rate: f32, weight_decay: f32) -> Result<Self> {
        if !(learning_rate > 0.0 && learning_rate.is_finite()) {
            return Err(NnError::config(format!(
                "learning rate must be positive, got {}",
                learning_rate
            )));
        }
        if !(weight_decay >= 0.0 && weight_decay.is_finite()) {
            return Err(NnError::config(format!(
                "weight decay must be non-negative, got {}",
                weight_decay
            )));
        }
        Ok(Self {
            learning_rate,
            weight_decay,
        })
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn weight_decay(&self) -> f32 {
        self.weight_decay
    }
}

/// Applies one decayed SGD step to `parameters` and clears `gradients`.
///
/// # Panics
///
/// Panics if `parameters` and `gradients` have different lengths.
pub fn sgd_step(
    parameters: &mut [f32],
    gradients: &mut [f32],
    learning_rate: f32,
    weight_decay: f32,
    batch_size: usize,
) {
    assert_eq!(
        parameters.len(),
        gradients.len(),
        "Parameters and gradients must have the same length"
    );
    let batch = batch_size.max(1) as f32;
    let shrink = 1.0 - (2.0 * learning_rate * weight_decay) / batch;
    let step = learning_rate / batch;

    for (param, grad) in parameters.iter_mut().zip(gradients.iter_mut()) {
        *param = shrink * *param - step * *grad;
        *grad = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgd_rejects_bad_hyperparameters() {
        assert!(Sgd::new(0.0, 0.0).is_err());
        assert!(Sgd::new(-0.1, 0.0).is_err());
        assert!(Sgd::new(0.1, -1.0).is_err());
        assert!(Sgd::new(0.1, 0.0005).is_ok());
    }

    #[test]
    fn test_step_divides_by_batch() {
        let mut params = vec![1.0, 2.0, 3.0];
        let mut grads = vec![0.4, 0.8, 1.2];
        sgd_step(&mut params, &mut grads, 0.1, 0.0, 4);
        assert!((params[0] - 0.99).abs() < 1e-6);
        assert!((params[1] - 1.98).abs() < 1e-6);
        assert!((params[2] - 2.97).abs() < 1e-6);
        assert_eq!(grads, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_step_with_decay_shrinks() {
        let mut params = vec![1.0];
        let mut grads = vec![0.0];
        sgd_step(&mut params, &mut grads, 0.5, 0.1, 2);
        // 1 - 2 * 0.5 * 0.1 / 2 = 0.95
        assert!((params[0] - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_second_step_without_gradient_is_noop() {
        let mut params = vec![0.3, -0.7];
        let mut grads = vec![1.0, 1.0];
        sgd_step(&mut params, &mut grads, 0.1, 0.0, 1);
        let after_first = params.clone();
        sgd_step(&mut params, &mut grads, 0.1, 0.0, 1);
        assert_eq!(params, after_first);
    }
}
