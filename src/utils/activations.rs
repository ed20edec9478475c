//! Scalar activation functions and their derivatives.
//!
//! The activation layer applies these elementwise; softmax works row-wise over
//! the feature dimension of each sample.

/// Gradient of ReLU taken at exactly `x == 0`.
///
/// The zero input is treated as the non-positive branch.
pub const RELU_GRAD_AT_ZERO: f32 = 0.0;

/// Scaled logistic tanh: `2 / (1 + e^{-x}) - 1` (equals `tanh(x / 2)`).
pub fn tanh(x: f32) -> f32 {
    2.0 / (1.0 + (-x).exp()) - 1.0
}

/// Derivative of [`tanh`] expressed through its output `y`.
pub fn tanh_derivative(y: f32) -> f32 {
    0.5 * (1.0 - y * y)
}

pub fn relu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

/// Derivative of ReLU at the pre-activation `x`.
pub fn relu_derivative(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x == 0.0 {
        RELU_GRAD_AT_ZERO
    } else {
        0.0
    }
}

/// Sigmoid activation function.
///
/// Returns the sigmoid of the input: 1 / (1 + exp(-x))
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Sigmoid derivative assuming y = sigmoid(z).
pub fn sigmoid_derivative(y: f32) -> f32 {
    y * (1.0 - y)
}

/// Softmax applied row-wise, writing into `outputs`.
///
/// Uses the max-subtraction trick for numerical stability.
///
/// # Arguments
/// * `inputs` - Flat array containing row-major logits
/// * `outputs` - Destination buffer, same length as `inputs`
/// * `cols` - Number of columns (classes) in each row
pub fn softmax_rows(inputs: &[f32], outputs: &mut [f32], cols: usize) {
    if cols == 0 {
        return;
    }
    assert_eq!(inputs.len(), outputs.len(), "softmax_rows length mismatch");
    assert_eq!(inputs.len() % cols, 0, "softmax_rows: ragged rows");

    for (row_in, row_out) in inputs.chunks_exact(cols).zip(outputs.chunks_exact_mut(cols)) {
        let max_value = row_in.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut sum = 0.0f32;
        for (o, &x) in row_out.iter_mut().zip(row_in) {
            *o = (x - max_value).exp();
            sum += *o;
        }

        let inv_sum = 1.0f32 / sum;
        for o in row_out.iter_mut() {
            *o *= inv_sum;
        }
    }
}
