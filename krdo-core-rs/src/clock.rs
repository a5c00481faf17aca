//! Simulated logical clock with bounded random drift
//!
//! Models an unsynchronized hardware clock: each tick gains one unit
//! plus a uniform perturbation in `[-rate, +rate]`, drawn independently
//! per tick. This is what makes periodic pull-sync worthwhile.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Per-node logical clock
#[derive(Debug)]
pub struct DriftClock {
    value: f64,
    rate: f64,
    rng: SmallRng,
}

impl DriftClock {
    /// New clock at zero with the given drift bound
    pub fn new(rate: f64) -> Self {
        Self {
            value: 0.0,
            rate,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Current reading
    pub fn value(&self) -> f64 {
        self.value
    }

    /// One tick: advance by `1 + drift`
    pub fn advance(&mut self) {
        let drift = (self.rng.gen::<f64>() * 2.0 - 1.0) * self.rate;
        self.value += 1.0 + drift;
    }

    /// Overwrite with a coordinator-supplied reading. No averaging.
    pub fn set(&mut self, value: f64) {
        self.value = value;
    }
}
