//! Deterministic seeds for the shard shuffles.
//!
//! A master seed is expanded into one sub-seed per `(universe, pass)` via
//! BLAKE3, so a given seed reproduces the same shard plans no matter how
//! many passes run or in which order they are derived.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct SeedHierarchy {
    master_seed: u64,
}

impl SeedHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    /// Fresh hierarchy from OS entropy.
    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Sub-seed for one shuffle of `universe` on search pass `pass`.
    pub fn sub_seed(&self, universe: &[String], pass: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        for ticker in universe {
            hasher.update(ticker.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&pass.to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    pub fn rng_for(&self, universe: &[String], pass: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(universe, pass))
    }
}
