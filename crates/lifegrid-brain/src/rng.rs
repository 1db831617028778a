//! Seedable randomness shared by policies and the simulation.

use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng};
use std::f64::consts::TAU;

/// Simulation random source: a small fast generator plus the cached second value of the
/// last Box–Muller draw.
///
/// Every consumer of randomness (weight init, mutation, action sampling, sensor noise)
/// receives one of these explicitly so that seeded runs replay exactly.
#[derive(Debug, Clone)]
pub struct SimRng {
    inner: SmallRng,
    spare: Option<f64>,
}

impl SimRng {
    /// Deterministic generator for the provided seed.
    #[must_use]
    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            inner: SmallRng::seed_from_u64(seed),
            spare: None,
        }
    }

    /// Generator seeded from the thread-local entropy source.
    #[must_use]
    pub fn from_entropy() -> Self {
        let seed: u64 = rand::random();
        Self::seed_from_u64(seed)
    }

    /// Uses `seed` when present, otherwise falls back to entropy.
    #[must_use]
    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seed_from_u64(seed),
            None => Self::from_entropy(),
        }
    }

    /// Derive an independent stream from this generator.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        Self::seed_from_u64(self.inner.next_u64())
    }

    /// Standard normal sample via Box–Muller; every other call returns the cached spare.
    pub fn standard_normal(&mut self) -> f32 {
        if let Some(spare) = self.spare.take() {
            return spare as f32;
        }
        // 1 - U maps [0, 1) onto (0, 1] so the logarithm stays finite.
        let u1 = 1.0 - self.inner.random::<f64>();
        let u2 = self.inner.random::<f64>();
        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = TAU * u2;
        self.spare = Some(radius * theta.sin());
        (radius * theta.cos()) as f32
    }

    /// Normal sample with the given mean and standard deviation.
    pub fn gaussian(&mut self, mean: f32, std_dev: f32) -> f32 {
        mean + std_dev * self.standard_normal()
    }

    /// Uniform sample in `[0, 1)`.
    pub fn unit(&mut self) -> f32 {
        self.inner.random::<f32>()
    }

    /// Uniform sample in `[-amplitude, amplitude)`; zero when the amplitude is not positive.
    pub fn symmetric(&mut self, amplitude: f32) -> f32 {
        if amplitude <= 0.0 {
            return 0.0;
        }
        self.inner.random_range(-amplitude..amplitude)
    }

    /// Returns true when a cached Box–Muller value is waiting.
    #[must_use]
    pub const fn has_spare(&self) -> bool {
        self.spare.is_some()
    }
}

impl RngCore for SimRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.inner.fill_bytes(dst);
    }
}
