//! Neural network layers.
//!
//! Every layer implements the [`Layer`] trait and is chained by
//! [`Network`](crate::network::Network):
//!
//! - [`DenseLayer`]: fully connected
//! - [`Conv2DLayer`]: 2D convolution with optional channel connection table
//! - [`Pool2DLayer`]: max / average pooling
//! - [`ActivationLayer`]: tanh, relu, sigmoid, softmax
//! - [`BatchNormLayer`]: 1D and 2D batch normalization
//! - [`FlattenLayer`]: feature maps to feature vector
//! - [`OutputLayer`]: loss and its gradient

mod r#trait;

pub mod activation;
pub mod batchnorm;
pub mod conv2d;
pub mod dense;
pub mod flatten;
pub mod output;
pub mod pooling;

pub use activation::{ActivationKind, ActivationLayer};
pub use batchnorm::{BatchNormDim, BatchNormLayer};
pub use conv2d::Conv2DLayer;
pub use dense::DenseLayer;
pub use flatten::FlattenLayer;
pub use output::{one_hot, LossKind, OutputLayer};
pub use pooling::{OverlapPolicy, Pool2DLayer, PoolKind};
pub use r#trait::Layer;
