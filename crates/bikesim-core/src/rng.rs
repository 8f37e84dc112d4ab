//! Injectable random source for physics-adjacent probabilistic effects.
//!
//! The scene never reaches for a process-wide generator: it owns a
//! [`RandomSource`] handed to it at construction, so wheel-spin particle
//! emission is reproducible under a fixed seed.

use crate::fixed::Fixed64;

/// A seedable source of uniform random bits.
pub trait RandomSource: std::fmt::Debug + Send {
    /// Next 64 uniformly distributed bits.
    fn next_u64(&mut self) -> u64;

    /// Returns `true` with the given probability.
    ///
    /// Probabilities at or below zero never fire, at or above one always do.
    fn chance(&mut self, probability: Fixed64) -> bool {
        if probability <= Fixed64::ZERO {
            return false;
        }
        if probability >= Fixed64::from_num(1) {
            return true;
        }
        // For p in (0,1) the raw Q32.32 bits are the fraction scaled to
        // [0, 2^32); compare against the upper half of a fresh draw.
        let upper = self.next_u64() >> 32;
        upper < probability.to_bits() as u64
    }
}

/// SplitMix64 generator: 8 bytes of state, serializable with the scene.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Internal state, fed into the scene state hash.
    pub fn state(&self) -> u64 {
        self.state
    }
}

impl RandomSource for SimRng {
    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SimRng::new(7);
        let mut b = SimRng::new(7);
        for _ in 0..64 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn chance_bounds() {
        let mut rng = SimRng::new(1);
        for _ in 0..50 {
            assert!(!rng.chance(Fixed64::ZERO));
            assert!(!rng.chance(Fixed64::from_num(-0.5)));
            assert!(rng.chance(Fixed64::from_num(1)));
            assert!(rng.chance(Fixed64::from_num(3)));
        }
    }

    #[test]
    fn seventy_percent_is_roughly_seventy() {
        let mut rng = SimRng::new(2024);
        let p = Fixed64::from_num(0.7);
        let hits = (0..10_000).filter(|_| rng.chance(p)).count();
        assert!((6_500..=7_500).contains(&hits), "got {hits}");
    }

    #[test]
    fn usable_as_trait_object() {
        let mut boxed: Box<dyn RandomSource> = Box::new(SimRng::new(5));
        let mut plain = SimRng::new(5);
        assert_eq!(boxed.next_u64(), plain.next_u64());
    }

    #[test]
    fn state_survives_json() {
        let mut rng = SimRng::new(42);
        rng.next_u64();
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: SimRng = serde_json::from_str(&json).unwrap();
        assert_eq!(rng.next_u64(), restored.next_u64());
    }
}
