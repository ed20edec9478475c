// Tests for backward propagation: hand-computed gradients, routing and
// the gradient reset performed by parameter updates.

use approx::assert_relative_eq;
use rust_lenet::layers::{
    ActivationLayer, Conv2DLayer, DenseLayer, Layer, LossKind, OverlapPolicy, Pool2DLayer,
};
use rust_lenet::optimizers::Sgd;
use rust_lenet::tensor::{Shape, Tensor};
use rust_lenet::utils::{InitScheme, SeededRng};
use rust_lenet::Network;

#[test]
fn test_dense_backward_known_weights() {
    let mut rng = SeededRng::new(1);
    let mut dense = DenseLayer::new(2, 1, InitScheme::Normal);
    dense.set_layer(1, Shape::Features(2), &mut rng).unwrap();
    dense.weights_mut().copy_from_slice(&[1.0, 1.0]);
    dense.biases_mut().copy_from_slice(&[0.0]);

    let x = Tensor::from_vec(1, Shape::Features(2), vec![3.0, 4.0]).unwrap();
    dense.forward(&x, true);
    dense.delta_mut().fill(1.0);
    let mut prev = Tensor::zeros(1, Shape::Features(2));
    dense.backward(&x, Some(&mut prev));

    assert_eq!(dense.grad_weights(), &[3.0, 4.0]);
    assert_eq!(dense.grad_biases(), &[1.0]);
    assert_eq!(prev.as_slice(), &[1.0, 1.0]);
}

#[test]
fn test_dense_gradients_sum_over_batch() {
    let mut rng = SeededRng::new(1);
    let mut dense = DenseLayer::new(2, 1, InitScheme::Normal);
    dense.set_layer(2, Shape::Features(2), &mut rng).unwrap();
    dense.weights_mut().copy_from_slice(&[2.0, -1.0]);

    let x = Tensor::from_vec(2, Shape::Features(2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    dense.forward(&x, true);
    dense
        .delta_mut()
        .as_mut_slice()
        .copy_from_slice(&[1.0, -1.0]);
    let mut prev = Tensor::zeros(2, Shape::Features(2));
    dense.backward(&x, Some(&mut prev));

    assert_eq!(dense.grad_weights(), &[-2.0, -2.0]);
    assert_eq!(dense.grad_biases(), &[0.0]);
    assert_eq!(prev.as_slice(), &[2.0, -1.0, -2.0, 1.0]);
}

#[test]
fn test_avg_pool_backward_spreads_evenly() {
    let mut rng = SeededRng::new(1);
    let mut pool = Pool2DLayer::avg(2, 2);
    pool.set_layer(1, Shape::image(1, 4, 4), &mut rng).unwrap();
    let x = Tensor::from_vec(1, Shape::image(1, 4, 4), vec![1.0; 16]).unwrap();
    pool.forward(&x, true);
    pool.delta_mut().fill(1.0);

    let mut prev = Tensor::zeros(1, Shape::image(1, 4, 4));
    pool.backward(&x, Some(&mut prev));
    for &v in prev.as_slice() {
        assert_relative_eq!(v, 0.25);
    }
}

#[test]
fn test_max_pool_routes_to_winner() {
    let mut rng = SeededRng::new(1);
    let mut pool = Pool2DLayer::max(2, 2);
    pool.set_layer(1, Shape::image(1, 2, 4), &mut rng).unwrap();
    // Left window has a unique maximum, right window is constant.
    let x = Tensor::from_vec(
        1,
        Shape::image(1, 2, 4),
        vec![0.0, 1.0, 7.0, 7.0, 8.0, 2.0, 7.0, 7.0],
    )
    .unwrap();
    pool.forward(&x, true);
    pool.delta_mut()
        .as_mut_slice()
        .copy_from_slice(&[2.5, -1.5]);

    let mut prev = Tensor::zeros(1, Shape::image(1, 2, 4));
    prev.fill(9.0);
    pool.backward(&x, Some(&mut prev));
    assert_eq!(
        prev.as_slice(),
        &[0.0, 0.0, -1.5, 0.0, 2.5, 0.0, 0.0, 0.0]
    );
}

#[test]
fn test_overlapping_max_pool_accumulates() {
    let mut rng = SeededRng::new(1);
    let mut pool = Pool2DLayer::max(2, 1);
    pool.set_layer(1, Shape::image(1, 2, 3), &mut rng).unwrap();
    // The centre column wins both windows.
    let x = Tensor::from_vec(1, Shape::image(1, 2, 3), vec![0.0, 5.0, 0.0, 0.0, 0.0, 0.0])
        .unwrap();
    pool.forward(&x, true);
    pool.delta_mut().fill(1.0);

    let mut prev = Tensor::zeros(1, Shape::image(1, 2, 3));
    pool.backward(&x, Some(&mut prev));
    assert_eq!(prev.as_slice()[1], 2.0);

    let mut assign = Pool2DLayer::max(2, 1).with_overlap_policy(OverlapPolicy::Assign);
    assign.set_layer(1, Shape::image(1, 2, 3), &mut rng).unwrap();
    assign.forward(&x, true);
    assign.delta_mut().fill(1.0);
    let mut prev = Tensor::zeros(1, Shape::image(1, 2, 3));
    assign.backward(&x, Some(&mut prev));
    assert_eq!(prev.as_slice()[1], 1.0);
}

#[test]
fn test_conv_backward_single_tap() {
    let mut rng = SeededRng::new(1);
    let mut conv = Conv2DLayer::new(1, 3, 1, InitScheme::Normal);
    conv.set_layer(1, Shape::image(1, 3, 3), &mut rng).unwrap();
    conv.kernels_mut().fill(0.0);
    conv.kernels_mut()[4] = 2.0;

    let data: Vec<f32> = (1..=9).map(|v| v as f32).collect();
    let x = Tensor::from_vec(1, Shape::image(1, 3, 3), data).unwrap();
    conv.forward(&x, true);
    conv.delta_mut().fill(0.0);
    *conv.delta_mut().at_mut(0, 0, 1, 1) = 1.0;

    let mut prev = Tensor::zeros(1, Shape::image(1, 3, 3));
    conv.backward(&x, Some(&mut prev));

    // dK[u][v] = x[u][v] for the centre output cell.
    let expected: Vec<f32> = (1..=9).map(|v| v as f32).collect();
    assert_eq!(conv.grad_kernels(), expected.as_slice());
    assert_eq!(conv.grad_biases(), &[1.0]);
    // Only the centre input sees the centre tap.
    let mut want = vec![0.0; 9];
    want[4] = 2.0;
    assert_eq!(prev.as_slice(), want.as_slice());
}

#[test]
fn test_relu_gradient_masks_negative_inputs() {
    let mut rng = SeededRng::new(1);
    let mut relu = ActivationLayer::relu();
    relu.set_layer(1, Shape::Features(4), &mut rng).unwrap();
    let x = Tensor::from_vec(1, Shape::Features(4), vec![-2.0, 0.0, 0.5, 3.0]).unwrap();
    relu.forward(&x, true);
    relu.delta_mut().fill(1.0);
    let mut prev = Tensor::zeros(1, Shape::Features(4));
    relu.backward(&x, Some(&mut prev));
    assert_eq!(prev.as_slice(), &[0.0, 0.0, 1.0, 1.0]);
}

#[test]
fn test_update_resets_gradients() {
    let mut rng = SeededRng::new(4);
    let mut dense = DenseLayer::new(3, 2, InitScheme::XavierUniform);
    dense.set_layer(2, Shape::Features(3), &mut rng).unwrap();
    let x = Tensor::from_vec(2, Shape::Features(3), vec![1.0, -1.0, 0.5, 0.2, 0.3, -0.4])
        .unwrap();
    dense.forward(&x, true);
    dense.delta_mut().fill(0.7);
    dense.backward(&x, None);
    assert!(dense.grad_weights().iter().any(|&g| g != 0.0));

    let before = dense.weights().to_vec();
    dense.update_parameters(0.1, 0.0);
    assert!(dense.grad_weights().iter().all(|&g| g == 0.0));
    assert!(dense.grad_biases().iter().all(|&g| g == 0.0));
    assert_ne!(dense.weights(), before.as_slice());

    let after_first = dense.weights().to_vec();
    let biases = dense.biases().to_vec();
    dense.update_parameters(0.1, 0.0);
    assert_eq!(dense.weights(), after_first.as_slice());
    assert_eq!(dense.biases(), biases.as_slice());
}

#[test]
fn test_update_step_is_mean_gradient() {
    let mut rng = SeededRng::new(1);
    let mut dense = DenseLayer::new(2, 1, InitScheme::Normal);
    dense.set_layer(2, Shape::Features(2), &mut rng).unwrap();
    dense.weights_mut().copy_from_slice(&[1.0, 1.0]);
    dense.biases_mut().copy_from_slice(&[0.0]);

    let x = Tensor::from_vec(2, Shape::Features(2), vec![1.0, 0.0, 3.0, 2.0]).unwrap();
    dense.forward(&x, true);
    dense.delta_mut().fill(1.0);
    dense.backward(&x, None);
    dense.update_parameters(0.5, 0.0);

    // Mean gradient is [2, 1] for W and 1 for b.
    assert_relative_eq!(dense.weights()[0], 0.0);
    assert_relative_eq!(dense.weights()[1], 0.5);
    assert_relative_eq!(dense.biases()[0], -0.5);
}

#[test]
fn test_network_backward_returns_batch_loss() {
    let mut net = Network::new(3);
    net.add(DenseLayer::new(2, 2, InitScheme::Normal))
        .add(ActivationLayer::softmax());
    net.compile(
        Shape::Features(2),
        2,
        Sgd::new(0.1, 0.0).unwrap(),
        LossKind::CrossEntropy,
    )
    .unwrap();
    for layer in net.layers_mut() {
        for buffer in layer.parameters_mut() {
            buffer.fill(0.0);
        }
    }

    // Zero weights give uniform probabilities, so the loss is ln 2.
    let x = Tensor::from_vec(2, Shape::Features(2), vec![1.0, 2.0, -1.0, 0.5]).unwrap();
    net.zero_grad();
    net.forward(&x, true).unwrap();
    let loss = net.backward(&x, &[0, 1]).unwrap();
    assert_relative_eq!(loss, std::f32::consts::LN_2, epsilon = 1e-6);

    // delta = p - onehot = [[-0.5, 0.5], [0.5, -0.5]]
    let grads = net.layers()[0].gradients();
    assert_relative_eq!(grads[0][0], -0.5 * 1.0 + 0.5 * -1.0, epsilon = 1e-6);
    assert_relative_eq!(grads[0][1], -0.5 * 2.0 + 0.5 * 0.5, epsilon = 1e-6);
    assert_relative_eq!(grads[1][0], 0.0, epsilon = 1e-6);
    assert_relative_eq!(grads[1][1], 0.0, epsilon = 1e-6);
}
