//! Shared utilities for the layers and the training loop.
//!
//! Random number generation, weight initialization, scalar activation
//! functions and the GEMM primitive.

pub mod activations;
pub mod gemm;
pub mod init;
pub mod rng;

pub use activations::{relu, sigmoid, softmax_rows, tanh, RELU_GRAD_AT_ZERO};
pub use gemm::sgemm_wrapper;
pub use init::InitScheme;
pub use rng::SeededRng;
