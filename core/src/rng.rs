//! Deterministic random number generation.
//!
//! RULE: Nothing in the engine may call any platform RNG.
//! All randomness flows through SampleRng instances derived
//! from the engine's master seed, or from an explicit caller seed.
//!
//! Each run gets its own RNG stream, seeded deterministically
//! from (master_seed XOR run_index * golden). This means:
//!   - Concurrent runs never share or contend on a stream.
//!   - Any run can be replayed from the seed recorded on its result.

use crate::types::Seed;
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::sync::atomic::{AtomicU64, Ordering};

const GOLDEN: u64 = 0x9e37_79b9_7f4a_7c15;

/// A deterministic RNG for a single run.
pub struct SampleRng {
    inner: Pcg64Mcg,
}

impl SampleRng {
    pub fn new(seed: Seed) -> Self {
        Self {
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Access to the underlying generator for `rand_distr` samplers.
    pub(crate) fn inner_mut(&mut self) -> &mut Pcg64Mcg {
        &mut self.inner
    }
}

/// Hands out per-run seeds derived from one master seed.
pub struct RngBank {
    master_seed: Seed,
    next_run:    AtomicU64,
}

impl RngBank {
    pub fn new(master_seed: Seed) -> Self {
        Self {
            master_seed,
            next_run: AtomicU64::new(0),
        }
    }

    /// Seed for the run with the given stable index.
    pub fn seed_for(&self, run_index: u64) -> Seed {
        self.master_seed ^ run_index.wrapping_mul(GOLDEN)
    }

    /// Claim the next run index and return its seed.
    pub fn next_seed(&self) -> Seed {
        let index = self.next_run.fetch_add(1, Ordering::Relaxed);
        self.seed_for(index)
    }
}
