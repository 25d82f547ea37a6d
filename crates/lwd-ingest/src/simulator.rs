//! Synthetic readings for a channel whose hardware is unavailable.

use chrono::Utc;
use lwd_config::SimulationConfig;
use lwd_schemas::{Grams, WeightSample, WeightSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Share of simulated readings flagged stable.
const STABLE_PROBABILITY: f64 = 0.9;

pub struct Simulator {
    source: WeightSource,
    baseline: Grams,
    variance: Grams,
    rng: StdRng,
}

impl Simulator {
    pub fn new(source: WeightSource, cfg: &SimulationConfig) -> Self {
        Self::with_rng(source, cfg, StdRng::from_entropy())
    }

    pub fn seeded(source: WeightSource, cfg: &SimulationConfig, seed: u64) -> Self {
        Self::with_rng(source, cfg, StdRng::seed_from_u64(seed))
    }

    fn with_rng(source: WeightSource, cfg: &SimulationConfig, rng: StdRng) -> Self {
        Self {
            source,
            baseline: cfg.baseline_kg,
            variance: cfg.variance_kg,
            rng,
        }
    }

    /// Uniform in `[baseline - variance, baseline + variance]`.
    pub fn next_sample(&mut self) -> WeightSample {
        let spread = self.variance.raw().abs();
        let offset = if spread == 0 {
            0
        } else {
            self.rng.gen_range(-spread..=spread)
        };

        WeightSample {
            source: self.source,
            value: self.baseline + Grams::new(offset),
            stable: self.rng.gen_bool(STABLE_PROBABILITY),
            captured_at: Utc::now(),
        }
    }
}
