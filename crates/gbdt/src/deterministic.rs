//! Deterministic utilities for reproducible training
//!
//! Provides an LCG-based RNG for seeded shuffles and the tie-breaking key
//! that keeps split selection identical across runs and platforms.

use std::num::Wrapping;

/// Linear Congruential Generator for deterministic pseudo-randomness
/// Uses constants from Numerical Recipes (glibc)
#[derive(Clone, Debug)]
pub struct LcgRng {
    state: Wrapping<i64>,
}

impl LcgRng {
    // LCG constants (compatible with glibc)
    const MULTIPLIER: i64 = 1103515245;
    const INCREMENT: i64 = 12345;
    const MODULUS: i64 = 1 << 31;

    pub fn new(seed: u64) -> Self {
        Self {
            state: Wrapping((seed % Self::MODULUS as u64) as i64),
        }
    }

    /// Generate next random value in range [0, MODULUS)
    pub fn next_i64(&mut self) -> i64 {
        self.state = self.state * Wrapping(Self::MULTIPLIER) + Wrapping(Self::INCREMENT);
        self.state.0 & (Self::MODULUS - 1)
    }

    /// Generate random index in range [0, max)
    ///
    /// Low LCG bits cycle with short periods, so only the upper 23 bits of
    /// two successive draws are combined.
    pub fn next_index(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        let hi = (self.next_i64() >> 8) as u64;
        let lo = (self.next_i64() >> 8) as u64;
        (((hi << 23) | lo) % max as u64) as usize
    }

    /// Fisher-Yates shuffle driven by this generator
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_index(i + 1);
            items.swap(i, j);
        }
    }
}

/// Deterministic tie-breaker for split selection
/// Returns consistent ordering based on (feature_idx, threshold bits, node_id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SplitTieBreaker {
    pub feature_idx: usize,
    pub threshold_bits: u64,
    pub node_id: usize,
}

impl SplitTieBreaker {
    pub fn new(feature_idx: usize, threshold: f64, node_id: usize) -> Self {
        Self {
            feature_idx,
            threshold_bits: threshold.to_bits(),
            node_id,
        }
    }
}
