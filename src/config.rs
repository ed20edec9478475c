//! Configuration structures for training
//!
//! This module provides the run configuration shared by the library and the
//! `mnist_lenet` binary. Every field has a default, so a JSON file only needs
//! to list what it changes.

use crate::dataset::Normalization;
use crate::error::{NnError, Result};
use crate::layers::{ActivationKind, LossKind, PoolKind};
use crate::utils::InitScheme;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Whether to train a model or evaluate a saved one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Train,
    Test,
}

impl FromStr for RunMode {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(RunMode::Train),
            "test" => Ok(RunMode::Test),
            other => Err(NnError::config(format!(
                "unknown mode '{}' (expected train or test)",
                other
            ))),
        }
    }
}

/// Built-in architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Two conv/pool stages followed by three dense layers.
    #[default]
    Lenet5,
    /// Three dense layers, 784 → 500 → 150 → 10.
    Linear,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Lenet5 => "lenet5",
            ModelKind::Linear => "linear",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lenet5" => Ok(ModelKind::Lenet5),
            "linear" => Ok(ModelKind::Linear),
            other => Err(NnError::config(format!(
                "unknown model '{}' (expected lenet5 or linear)",
                other
            ))),
        }
    }
}

/// Run configuration.
///
/// # Example
///
/// ```json
/// {
///   "model": "lenet5",
///   "activ": "tanh",
///   "pool": "avg",
///   "batch": 64,
///   "epoch": 10,
///   "lr": 0.05,
///   "use_batchnorm": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub mode: RunMode,
    pub model: ModelKind,
    /// Directory holding the MNIST IDX files.
    pub data_dir: PathBuf,
    /// Directory checkpoints are written to and read from.
    pub save_dir: PathBuf,
    /// Checkpoint file name inside `save_dir` (required in test mode).
    pub pretrained: Option<String>,
    pub pool: PoolKind,
    /// Hidden-layer activation.
    pub activ: ActivationKind,
    pub init: InitScheme,
    pub loss: LossKind,
    pub batch: usize,
    pub epoch: usize,
    pub lr: f32,
    pub decay: f32,
    pub use_batchnorm: bool,
    pub shuffle_train: bool,
    pub shuffle_test: bool,
    pub normalization: Normalization,
    pub seed: u64,
    /// Use only the first `n` training samples.
    pub n_train: Option<usize>,
    /// Use only the first `n` test samples.
    pub n_test: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Train,
            model: ModelKind::Lenet5,
            data_dir: PathBuf::from("./dataset"),
            save_dir: PathBuf::from("./model_zoo"),
            pretrained: None,
            pool: PoolKind::Max,
            activ: ActivationKind::Relu,
            init: InitScheme::LecunUniform,
            loss: LossKind::CrossEntropy,
            batch: 32,
            epoch: 30,
            lr: 0.01,
            decay: 0.0,
            use_batchnorm: false,
            shuffle_train: true,
            shuffle_test: false,
            normalization: Normalization::ZScore,
            seed: 42,
            n_train: None,
            n_test: None,
        }
    }
}

impl TrainingConfig {
    /// Where training writes its checkpoint: `save_dir/<model>.pth`.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.save_dir.join(format!("{}.pth", self.model))
    }

    /// Checkpoint evaluated in test mode.
    pub fn pretrained_path(&self) -> Option<PathBuf> {
        self.pretrained.as_ref().map(|name| self.save_dir.join(name))
    }
}

/// Loads a training configuration from a JSON file.
///
/// Reads the file at `path`, deserializes it into a `TrainingConfig` and
/// validates it.
///
/// # Examples
///
/// ```no_run
/// use rust_lenet::config::load_config;
///
/// let cfg = load_config("config/lenet5_tanh.json").unwrap();
/// assert!(cfg.batch > 0);
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<TrainingConfig> {
    let contents = fs::read_to_string(path)?;
    let config: TrainingConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks value ranges and mode requirements.
pub fn validate_config(config: &TrainingConfig) -> Result<()> {
    if config.batch == 0 {
        return Err(NnError::config("batch must be greater than 0"));
    }
    if !(config.lr > 0.0 && config.lr.is_finite()) {
        return Err(NnError::config(format!(
            "lr must be positive, got {}",
            config.lr
        )));
    }
    if !(config.decay >= 0.0 && config.decay.is_finite()) {
        return Err(NnError::config(format!(
            "decay must be non-negative, got {}",
            config.decay
        )));
    }
    if config.activ == ActivationKind::Softmax {
        return Err(NnError::config(
            "softmax cannot be used as the hidden activation",
        ));
    }
    match config.mode {
        RunMode::Train if config.epoch == 0 => {
            Err(NnError::config("epoch must be greater than 0 in train mode"))
        }
        RunMode::Test if config.pretrained.is_none() => Err(NnError::config(
            "test mode needs a pretrained checkpoint name",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = TrainingConfig::default();
        assert!(validate_config(&cfg).is_ok());
        assert_eq!(cfg.checkpoint_path(), PathBuf::from("./model_zoo/lenet5.pth"));
        assert_eq!(cfg.pretrained_path(), None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: TrainingConfig =
            serde_json::from_str(r#"{"model": "linear", "activ": "tanh", "batch": 8}"#).unwrap();
        assert_eq!(cfg.model, ModelKind::Linear);
        assert_eq!(cfg.activ, ActivationKind::Tanh);
        assert_eq!(cfg.batch, 8);
        assert_eq!(cfg.epoch, 30);
        assert_eq!(cfg.init, InitScheme::LecunUniform);
    }

    #[test]
    fn test_validation_failures() {
        let cfg = TrainingConfig {
            lr: 0.0,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());

        let cfg = TrainingConfig {
            mode: RunMode::Test,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());

        let cfg = TrainingConfig {
            activ: ActivationKind::Softmax,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("test".parse::<RunMode>().unwrap(), RunMode::Test);
        assert_eq!("lenet5".parse::<ModelKind>().unwrap(), ModelKind::Lenet5);
        assert!("resnet".parse::<ModelKind>().is_err());
    }
}
