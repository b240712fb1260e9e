//! Seedable random number generator for deterministic testing.
//!
//! When a seed is provided via [`ConfigBuilder::rng_seed`](crate::ConfigBuilder::rng_seed),
//! hello randoms and server-generated session ids become deterministic.
//! Key material always comes from the crypto provider's secure random.

use rand::distributions::{Distribution, Standard};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// A random number generator that can be seeded for deterministic behavior.
///
/// Without a seed it uses the thread-local generator.
pub struct SeededRng {
    inner: Option<StdRng>,
}

impl SeededRng {
    pub fn new(seed: Option<u64>) -> Self {
        let inner = seed.map(StdRng::seed_from_u64);
        Self { inner }
    }

    /// Generate a random value of type T.
    pub fn random<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        match self.inner.as_mut() {
            Some(rng) => rng.gen(),
            None => rand::random(),
        }
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        match self.inner.as_mut() {
            Some(rng) => rng.fill_bytes(buf),
            None => rand::thread_rng().fill_bytes(buf),
        }
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRng")
            .field("seeded", &self.inner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rng_is_deterministic() {
        let mut rng1 = SeededRng::new(Some(12345));
        let mut rng2 = SeededRng::new(Some(12345));

        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        rng1.fill(&mut a);
        rng2.fill(&mut b);

        assert_eq!(a, b, "Same seed should produce same bytes");
        assert_eq!(rng1.random::<u64>(), rng2.random::<u64>());
    }

    #[test]
    fn different_seeds_produce_different_values() {
        let mut rng1 = SeededRng::new(Some(12345));
        let mut rng2 = SeededRng::new(Some(54321));

        let value1: u64 = rng1.random();
        let value2: u64 = rng2.random();

        assert_ne!(value1, value2);
    }
}
