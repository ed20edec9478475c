//! Parameter update rules.
//!
//! Only plain SGD with L2 weight decay is provided; there is no momentum or
//! per-parameter state, so the same [`Sgd`] value can drive every layer.

pub mod sgd;

pub use sgd::{sgd_step, Sgd};
