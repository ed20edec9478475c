//! Architecture configuration and model building
//!
//! Networks come either from the built-in presets ([`lenet5`], [`linear`])
//! or from a JSON architecture file listing the layers in order. Only
//! hyperparameters are given per layer; input sizes are inferred when the
//! network is compiled.

use crate::config::{ModelKind, TrainingConfig};
use crate::error::{NnError, Result};
use crate::layers::batchnorm::{DEFAULT_EPSILON, DEFAULT_MOMENTUM};
use crate::layers::{
    ActivationKind, ActivationLayer, BatchNormDim, BatchNormLayer, Conv2DLayer, DenseLayer,
    FlattenLayer, Layer, LossKind, Pool2DLayer, PoolKind,
};
use crate::network::Network;
use crate::tensor::Shape;
use crate::utils::InitScheme;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Per-sample shape of MNIST digits.
pub const MNIST_SHAPE: Shape = Shape::Image {
    channels: 1,
    height: 28,
    width: 28,
};
pub const MNIST_CLASSES: usize = 10;

/// Configuration for a single layer in the neural network.
///
/// Different layer types use different fields:
///
/// - **dense**: `input_size`, `output_size`, optional `init`
/// - **conv2d**: `out_channels`, `kernel_size`, optional `padding` (default 0),
///   `connections` (`"full"` or `"lenet5_c3"`), `init`
/// - **pool2d**: `pool` (`"max"` / `"avg"`), `pool_size`, optional `stride`
///   (default `pool_size`)
/// - **activation**: `activation`
/// - **batchnorm1d** / **batchnorm2d**: optional `epsilon` (default 1e-5),
///   `momentum` (default 0.9)
/// - **flatten**: no fields
///
/// # Examples
///
/// ```json
/// {
///   "layer_type": "conv2d",
///   "out_channels": 6,
///   "kernel_size": 5,
///   "padding": 2
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerConfig {
    pub layer_type: String,

    // Dense
    pub input_size: Option<usize>,
    pub output_size: Option<usize>,

    // Conv2D
    pub out_channels: Option<usize>,
    pub kernel_size: Option<usize>,
    pub padding: Option<usize>,
    pub connections: Option<String>,
    pub init: Option<InitScheme>,

    // Pool2D
    pub pool: Option<PoolKind>,
    pub pool_size: Option<usize>,
    pub stride: Option<usize>,

    // Activation
    pub activation: Option<ActivationKind>,

    // BatchNorm
    pub epsilon: Option<f32>,
    pub momentum: Option<f32>,
}

/// Configuration for the entire neural network architecture.
///
/// # Example
///
/// ```json
/// {
///   "input_shape": [1, 28, 28],
///   "layers": [
///     { "layer_type": "flatten" },
///     { "layer_type": "dense", "input_size": 784, "output_size": 100 },
///     { "layer_type": "activation", "activation": "tanh" },
///     { "layer_type": "dense", "input_size": 100, "output_size": 10 },
///     { "layer_type": "activation", "activation": "softmax" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchitectureConfig {
    /// `[features]` or `[channels, height, width]`; MNIST when omitted.
    pub input_shape: Option<Vec<usize>>,
    /// Sequence of layer configurations defining the network structure
    pub layers: Vec<LayerConfig>,
}

impl ArchitectureConfig {
    pub fn input(&self) -> Result<Shape> {
        match self.input_shape.as_deref() {
            None => Ok(MNIST_SHAPE),
            Some(&[n]) if n > 0 => Ok(Shape::Features(n)),
            Some(&[c, h, w]) if c > 0 && h > 0 && w > 0 => Ok(Shape::image(c, h, w)),
            Some(other) => Err(NnError::config(format!(
                "input_shape must be [n] or [c, h, w] with positive entries, got {:?}",
                other
            ))),
        }
    }
}

/// Loads an architecture configuration from a JSON file.
///
/// The configuration is validated (field ranges and shape chaining) before
/// it is returned.
///
/// # Examples
///
/// ```no_run
/// use rust_lenet::architecture::load_architecture;
///
/// let arch = load_architecture("config/lenet5_c3.json").unwrap();
/// assert!(!arch.layers.is_empty());
/// ```
pub fn load_architecture(path: impl AsRef<Path>) -> Result<ArchitectureConfig> {
    let contents = fs::read_to_string(path)?;
    let config: ArchitectureConfig = serde_json::from_str(&contents)?;
    validate_architecture(&config)?;
    Ok(config)
}

fn require<T: Copy>(value: Option<T>, field: &str, layer: &LayerConfig, index: usize) -> Result<T> {
    value.ok_or_else(|| {
        NnError::config(format!(
            "Layer {}: {} layer requires '{}'",
            index, layer.layer_type, field
        ))
    })
}

fn positive(value: usize, field: &str, index: usize) -> Result<usize> {
    if value == 0 {
        return Err(NnError::config(format!(
            "Layer {}: {} must be greater than 0",
            index, field
        )));
    }
    Ok(value)
}

/// Builds one layer, checking the fields its type needs.
pub fn build_layer(
    layer: &LayerConfig,
    index: usize,
    default_init: InitScheme,
) -> Result<Box<dyn Layer>> {
    let init = layer.init.unwrap_or(default_init);
    let built: Box<dyn Layer> = match layer.layer_type.to_lowercase().as_str() {
        "dense" => {
            let input = require(layer.input_size, "input_size", layer, index)?;
            let output = require(layer.output_size, "output_size", layer, index)?;
            Box::new(DenseLayer::new(
                positive(input, "input_size", index)?,
                positive(output, "output_size", index)?,
                init,
            ))
        }
        "conv2d" => {
            let out_channels = require(layer.out_channels, "out_channels", layer, index)?;
            let kernel = require(layer.kernel_size, "kernel_size", layer, index)?;
            let conv = Conv2DLayer::new(
                positive(out_channels, "out_channels", index)?,
                positive(kernel, "kernel_size", index)?,
                layer.padding.unwrap_or(0),
                init,
            );
            match layer.connections.as_deref() {
                None | Some("full") => Box::new(conv),
                Some("lenet5_c3") => {
                    Box::new(conv.with_connections(Conv2DLayer::lenet5_c3_connections()))
                }
                Some(other) => {
                    return Err(NnError::config(format!(
                        "Layer {}: unknown connections '{}' (expected full or lenet5_c3)",
                        index, other
                    )))
                }
            }
        }
        "pool2d" => {
            let kind = require(layer.pool, "pool", layer, index)?;
            let size = require(layer.pool_size, "pool_size", layer, index)?;
            let size = positive(size, "pool_size", index)?;
            let stride = positive(layer.stride.unwrap_or(size), "stride", index)?;
            Box::new(Pool2DLayer::new(kind, size, stride))
        }
        "activation" => Box::new(ActivationLayer::new(require(
            layer.activation,
            "activation",
            layer,
            index,
        )?)),
        "batchnorm1d" | "batchnorm2d" => {
            let dim = if layer.layer_type.eq_ignore_ascii_case("batchnorm1d") {
                BatchNormDim::OneD
            } else {
                BatchNormDim::TwoD
            };
            let bn = BatchNormLayer::new(
                dim,
                layer.epsilon.unwrap_or(DEFAULT_EPSILON),
                layer.momentum.unwrap_or(DEFAULT_MOMENTUM),
            )
            .map_err(|e| NnError::config(format!("Layer {}: {}", index, e)))?;
            Box::new(bn)
        }
        "flatten" => Box::new(FlattenLayer::new()),
        _ => {
            return Err(NnError::config(format!(
                "Layer {}: Invalid layer type '{}'. Must be one of: dense, conv2d, pool2d, activation, batchnorm1d, batchnorm2d, flatten",
                index, layer.layer_type
            )))
        }
    };
    Ok(built)
}

/// Validates an architecture configuration.
///
/// Checks that:
/// - Architecture has at least one layer
/// - Each layer has the required fields for its type, within valid ranges
/// - Every layer accepts the output shape of its predecessor
/// - Dense `input_size` matches the incoming feature count
/// - A softmax activation only appears as the last layer
pub fn validate_architecture(config: &ArchitectureConfig) -> Result<()> {
    if config.layers.is_empty() {
        return Err(NnError::config("Architecture must have at least one layer"));
    }
    let last = config.layers.len() - 1;
    let mut shape = config.input()?;
    for (i, layer_cfg) in config.layers.iter().enumerate() {
        let softmax = layer_cfg.layer_type == "activation"
            && layer_cfg.activation == Some(ActivationKind::Softmax);
        if softmax && i != last {
            return Err(NnError::config(format!(
                "Layer {}: softmax must be the last layer",
                i
            )));
        }
        let layer = build_layer(layer_cfg, i, InitScheme::default())?;
        shape = layer.output_shape(shape).map_err(|e| {
            NnError::shape(format!(
                "Layer {} ({}) does not accept its input: {}",
                i, layer_cfg.layer_type, e
            ))
        })?;
    }
    Ok(())
}

/// Builds an uncompiled network from an architecture configuration.
pub fn build_network(
    config: &ArchitectureConfig,
    default_init: InitScheme,
    seed: u64,
) -> Result<Network> {
    let mut network = Network::new(seed);
    for (i, layer) in config.layers.iter().enumerate() {
        network.push(build_layer(layer, i, default_init)?);
    }
    Ok(network)
}

/// Output activation matching the loss: softmax for cross-entropy,
/// sigmoid for MSE.
fn output_activation(loss: LossKind) -> ActivationLayer {
    match loss {
        LossKind::CrossEntropy => ActivationLayer::softmax(),
        LossKind::Mse => ActivationLayer::sigmoid(),
    }
}

/// LeNet-5: `conv(6, 5x5, pad 2) → pool → conv(16, 5x5) → pool → 120 → 84 → 10`.
///
/// Batch normalization follows every conv/dense layer when
/// `cfg.use_batchnorm` is set.
pub fn lenet5(cfg: &TrainingConfig) -> Network {
    let mut net = Network::new(cfg.seed);
    for (out_channels, pad) in [(6, 2), (16, 0)] {
        net.add(Conv2DLayer::new(out_channels, 5, pad, cfg.init));
        if cfg.use_batchnorm {
            net.add(BatchNormLayer::new_2d());
        }
        net.add(ActivationLayer::new(cfg.activ));
        net.add(Pool2DLayer::new(cfg.pool, 2, 2));
    }
    net.add(FlattenLayer::new());
    dense_stack(&mut net, cfg, &[400, 120, 84, MNIST_CLASSES]);
    net
}

/// Fully connected baseline: `784 → 500 → 150 → 10`.
pub fn linear(cfg: &TrainingConfig) -> Network {
    let mut net = Network::new(cfg.seed);
    net.add(FlattenLayer::new());
    dense_stack(&mut net, cfg, &[784, 500, 150, MNIST_CLASSES]);
    net
}

fn dense_stack(net: &mut Network, cfg: &TrainingConfig, sizes: &[usize]) {
    let last = sizes.len() - 2;
    for (i, pair) in sizes.windows(2).enumerate() {
        net.add(DenseLayer::new(pair[0], pair[1], cfg.init));
        if cfg.use_batchnorm {
            net.add(BatchNormLayer::new_1d());
        }
        if i < last {
            net.add(ActivationLayer::new(cfg.activ));
        }
    }
    net.add(output_activation(cfg.loss));
}

/// Preset selected by `cfg.model`.
pub fn build_model(cfg: &TrainingConfig) -> Network {
    match cfg.model {
        ModelKind::Lenet5 => lenet5(cfg),
        ModelKind::Linear => linear(cfg),
    }
}
