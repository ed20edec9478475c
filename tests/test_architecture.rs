// Tests for architecture configuration parsing, validation and the
// built-in model presets.

use rust_lenet::architecture::{
    build_layer, build_model, build_network, lenet5, linear, load_architecture,
    validate_architecture, ArchitectureConfig, LayerConfig, MNIST_SHAPE,
};
use rust_lenet::config::{ModelKind, TrainingConfig};
use rust_lenet::layers::{ActivationKind, Layer, LossKind, PoolKind};
use rust_lenet::optimizers::Sgd;
use rust_lenet::tensor::Shape;
use rust_lenet::utils::InitScheme;
use rust_lenet::NnError;
use std::fs;
use tempfile::TempDir;

fn layer(layer_type: &str) -> LayerConfig {
    LayerConfig {
        layer_type: layer_type.to_string(),
        ..Default::default()
    }
}

fn dense(input: usize, output: usize) -> LayerConfig {
    LayerConfig {
        input_size: Some(input),
        output_size: Some(output),
        ..layer("dense")
    }
}

fn activation(kind: ActivationKind) -> LayerConfig {
    LayerConfig {
        activation: Some(kind),
        ..layer("activation")
    }
}

fn names(cfg: &TrainingConfig) -> Vec<&'static str> {
    build_model(cfg)
        .layers()
        .iter()
        .map(|l| l.name())
        .collect()
}

#[test]
fn test_load_bundled_lenet5_c3() {
    let arch = load_architecture("config/lenet5_c3.json").unwrap();
    assert_eq!(arch.input().unwrap(), MNIST_SHAPE);
    assert_eq!(arch.layers.len(), 13);

    let mut net = build_network(&arch, InitScheme::LecunUniform, 1).unwrap();
    net.compile(
        MNIST_SHAPE,
        2,
        Sgd::new(0.01, 0.0).unwrap(),
        LossKind::CrossEntropy,
    )
    .unwrap();
    assert_eq!(net.layers()[3].output().shape(), Shape::image(16, 10, 10));
    assert_eq!(net.output().shape(), Shape::Features(10));
}

#[test]
fn test_input_shape_mismatch_is_caught() {
    let arch = ArchitectureConfig {
        input_shape: Some(vec![1, 28, 28]),
        layers: vec![layer("flatten"), dense(100, 10)],
    };
    assert!(matches!(
        validate_architecture(&arch),
        Err(NnError::ShapeMismatch(_))
    ));

    let arch = ArchitectureConfig {
        input_shape: Some(vec![1, 28, 28]),
        layers: vec![dense(784, 10)],
    };
    assert!(matches!(
        validate_architecture(&arch),
        Err(NnError::ShapeMismatch(_))
    ));
}

#[test]
fn test_valid_feature_architecture() {
    let arch = ArchitectureConfig {
        input_shape: Some(vec![20]),
        layers: vec![
            dense(20, 8),
            layer("batchnorm1d"),
            activation(ActivationKind::Sigmoid),
            dense(8, 3),
            activation(ActivationKind::Softmax),
        ],
    };
    assert!(validate_architecture(&arch).is_ok());
    let net = build_network(&arch, InitScheme::Normal, 3).unwrap();
    assert_eq!(net.len(), 5);
}

#[test]
fn test_softmax_on_feature_maps_is_rejected() {
    let arch = ArchitectureConfig {
        input_shape: Some(vec![1, 6, 6]),
        layers: vec![activation(ActivationKind::Softmax)],
    };
    assert!(validate_architecture(&arch).is_err());
}

#[test]
fn test_build_layer_errors() {
    let err = build_layer(&layer("dense"), 0, InitScheme::Normal).unwrap_err();
    assert!(err.to_string().contains("input_size"));

    let err = build_layer(&layer("recurrent"), 4, InitScheme::Normal).unwrap_err();
    assert!(matches!(err, NnError::InvalidConfiguration(_)));
    assert!(err.to_string().contains("recurrent"));

    let bad_connections = LayerConfig {
        out_channels: Some(16),
        kernel_size: Some(5),
        connections: Some("random".to_string()),
        ..layer("conv2d")
    };
    assert!(build_layer(&bad_connections, 0, InitScheme::Normal).is_err());

    let zero_pool = LayerConfig {
        pool: Some(PoolKind::Max),
        pool_size: Some(0),
        ..layer("pool2d")
    };
    assert!(build_layer(&zero_pool, 0, InitScheme::Normal).is_err());

    let bad_momentum = LayerConfig {
        momentum: Some(1.5),
        ..layer("batchnorm2d")
    };
    assert!(build_layer(&bad_momentum, 0, InitScheme::Normal).is_err());
}

#[test]
fn test_pool_stride_defaults_to_size() {
    let cfg = LayerConfig {
        pool: Some(PoolKind::Avg),
        pool_size: Some(2),
        ..layer("pool2d")
    };
    let pool = build_layer(&cfg, 0, InitScheme::Normal).unwrap();
    assert_eq!(
        pool.output_shape(Shape::image(3, 8, 8)).unwrap(),
        Shape::image(3, 4, 4)
    );
}

#[test]
fn test_load_architecture_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("arch.json");

    fs::write(&path, r#"{"layers": []}"#).unwrap();
    assert!(matches!(
        load_architecture(&path),
        Err(NnError::InvalidConfiguration(_))
    ));

    fs::write(&path, r#"{"layers": [{"layer_type": "flatten", "units": 3}]}"#).unwrap();
    assert!(matches!(load_architecture(&path), Err(NnError::Json(_))));

    fs::write(&path, r#"{"input_shape": [2, 3], "layers": [{"layer_type": "flatten"}]}"#)
        .unwrap();
    assert!(matches!(
        load_architecture(&path),
        Err(NnError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_presets() {
    let cfg = TrainingConfig::default();
    assert_eq!(
        names(&cfg),
        vec![
            "conv2d",
            "relu",
            "max_pool2d",
            "conv2d",
            "relu",
            "max_pool2d",
            "flatten",
            "dense",
            "relu",
            "dense",
            "relu",
            "dense",
            "softmax",
        ]
    );

    let mse = TrainingConfig {
        model: ModelKind::Linear,
        loss: LossKind::Mse,
        activ: ActivationKind::Tanh,
        ..Default::default()
    };
    let net = linear(&mse);
    assert_eq!(net.layers().last().map(|l| l.name()), Some("sigmoid"));
    assert_eq!(build_model(&mse).len(), net.len());

    let bn = TrainingConfig {
        use_batchnorm: true,
        ..Default::default()
    };
    let layers = names(&bn);
    assert_eq!(layers[1], "batch_norm2d");
    assert_eq!(layers.iter().filter(|&&n| n == "batch_norm1d").count(), 3);
    assert_eq!(lenet5(&bn).len(), layers.len());
}

#[test]
fn test_softmax_must_close_the_architecture() {
    let arch = ArchitectureConfig {
        input_shape: Some(vec![4]),
        layers: vec![
            dense(4, 4),
            activation(ActivationKind::Softmax),
            dense(4, 2),
            activation(ActivationKind::Sigmoid),
        ],
    };
    let err = validate_architecture(&arch).unwrap_err();
    assert!(matches!(err, NnError::InvalidConfiguration(_)));
    assert!(err.to_string().contains("Layer 1"));
}

#[test]
fn test_bundled_architecture_rejects_mse() {
    let arch = load_architecture("config/lenet5_c3.json").unwrap();
    let mut net = build_network(&arch, InitScheme::LecunUniform, 1).unwrap();
    assert!(matches!(
        net.compile(MNIST_SHAPE, 2, Sgd::new(0.01, 0.0).unwrap(), LossKind::Mse),
        Err(NnError::InvalidConfiguration(_))
    ));
}
