//! Weight initialization schemes.
//!
//! Every scheme draws from a zero-centred normal or uniform distribution whose
//! spread depends on the fan-in / fan-out of the layer. Biases always start at
//! zero and are not touched here.

use crate::error::NnError;
use crate::utils::rng::SeededRng;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Numerator of the classic LeNet uniform radius `2.4 / fan_in`.
pub const LENET_UNIFORM_SCALE: f32 = 2.4;

/// Selectable weight initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InitScheme {
    /// `N(0, sqrt(2 / (fan_in + fan_out)))`
    Normal,
    /// `U(-2.4 / fan_in, 2.4 / fan_in)`
    Uniform,
    /// `N(0, sqrt(1 / fan_in))`
    LecunNormal,
    /// `U(-r, r)`, `r = sqrt(1 / fan_in)`
    #[default]
    LecunUniform,
    /// `N(0, sqrt(2 / (fan_in + fan_out)))`
    XavierNormal,
    /// `U(-r, r)`, `r = sqrt(6 / (fan_in + fan_out))`
    XavierUniform,
    /// `N(0, sqrt(2 / fan_in))`
    KaimingNormal,
    /// `U(-r, r)`, `r = sqrt(6 / fan_in)`
    KaimingUniform,
}

impl InitScheme {
    pub const ALL: [InitScheme; 8] = [
        InitScheme::Normal,
        InitScheme::Uniform,
        InitScheme::LecunNormal,
        InitScheme::LecunUniform,
        InitScheme::XavierNormal,
        InitScheme::XavierUniform,
        InitScheme::KaimingNormal,
        InitScheme::KaimingUniform,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InitScheme::Normal => "normal",
            InitScheme::Uniform => "uniform",
            InitScheme::LecunNormal => "lecun_normal",
            InitScheme::LecunUniform => "lecun_uniform",
            InitScheme::XavierNormal => "xavier_normal",
            InitScheme::XavierUniform => "xavier_uniform",
            InitScheme::KaimingNormal => "kaiming_normal",
            InitScheme::KaimingUniform => "kaiming_uniform",
        }
    }

    pub fn is_uniform(&self) -> bool {
        matches!(
            self,
            InitScheme::Uniform
                | InitScheme::LecunUniform
                | InitScheme::XavierUniform
                | InitScheme::KaimingUniform
        )
    }

    /// Standard deviation (normal schemes) or radius (uniform schemes).
    pub fn spread(&self, fan_in: usize, fan_out: usize) -> f32 {
        let fan_in = fan_in.max(1) as f32;
        let fan_out = fan_out as f32;
        match self {
            InitScheme::Normal | InitScheme::XavierNormal => (2.0 / (fan_in + fan_out)).sqrt(),
            InitScheme::Uniform => LENET_UNIFORM_SCALE / fan_in,
            InitScheme::LecunNormal | InitScheme::LecunUniform => (1.0 / fan_in).sqrt(),
            InitScheme::XavierUniform => (6.0 / (fan_in + fan_out)).sqrt(),
            InitScheme::KaimingNormal => (2.0 / fan_in).sqrt(),
            InitScheme::KaimingUniform => (6.0 / fan_in).sqrt(),
        }
    }

    /// Fills `weights` according to the scheme.
    pub fn fill(&self, weights: &mut [f32], fan_in: usize, fan_out: usize, rng: &mut SeededRng) {
        let spread = self.spread(fan_in, fan_out);
        if self.is_uniform() {
            rng.fill_uniform(weights, spread);
        } else {
            rng.fill_normal(weights, spread);
        }
    }
}

impl fmt::Display for InitScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InitScheme {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InitScheme::ALL
            .iter()
            .copied()
            .find(|scheme| scheme.name() == s)
            .ok_or_else(|| {
                NnError::config(format!(
                    "unknown initialization '{}' (expected one of: {})",
                    s,
                    InitScheme::ALL
                        .iter()
                        .map(|i| i.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}
