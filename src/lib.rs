//! LeNet-style convolutional network trainer
//!
//! A small, dependency-light library for training convolutional and dense
//! networks on MNIST-like data with plain mini-batch SGD.
//!
//! # Modules
//!
//! - `tensor`: batch tensors and per-sample shapes
//! - `layers`: Layer trait and implementations (Dense, Conv2D, pooling, ...)
//! - `network`: layer chain, training loop and evaluation
//! - `optimizers`: SGD with weight decay
//! - `dataset`: in-memory datasets, batch partitioning, MNIST reader
//! - `checkpoint`: binary parameter save/load
//! - `report`: training progress reporting
//! - `config`: run configuration
//! - `architecture`: JSON architectures and the built-in presets
//! - `utils`: RNG, initializers, activation functions, GEMM

pub mod architecture;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod layers;
pub mod network;
pub mod optimizers;
pub mod report;
pub mod tensor;
pub mod utils;

pub use error::{NnError, Result};
pub use network::Network;
pub use tensor::{Shape, Tensor};
