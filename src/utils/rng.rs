//! Seeded random number generation for weight initialization and shuffling.
//!
//! Wraps `StdRng` so the same seed always reproduces the same weights and
//! batch order, which the reproducibility tests rely on.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Uniform};

const FALLBACK_SEED: u64 = 0x9e3779b97f4a7c15;

/// Deterministic RNG shared by a network's layers.
#[derive(Debug, Clone)]
pub struct SeededRng {
    rng: StdRng,
}

impl SeededRng {
    /// Create a new RNG with explicit seed (if zero, use a fixed value).
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { FALLBACK_SEED } else { seed };
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Fills `out` from `U(-r, r)`.
    pub fn fill_uniform(&mut self, out: &mut [f32], r: f32) {
        if r <= 0.0 {
            out.iter_mut().for_each(|x| *x = 0.0);
            return;
        }
        let dist = Uniform::new(-r, r);
        for x in out.iter_mut() {
            *x = dist.sample(&mut self.rng);
        }
    }

    /// Fills `out` from `N(0, std)`.
    pub fn fill_normal(&mut self, out: &mut [f32], std: f32) {
        match Normal::new(0.0f32, std) {
            Ok(dist) => {
                for x in out.iter_mut() {
                    *x = dist.sample(&mut self.rng);
                }
            }
            // Non-finite or negative std: leave a deterministic zero init.
            Err(_) => out.iter_mut().for_each(|x| *x = 0.0),
        }
    }

    /// Fisher-Yates shuffle for usize slices.
    pub fn shuffle_usize(&mut self, data: &mut [usize]) {
        data.shuffle(&mut self.rng);
    }
}
