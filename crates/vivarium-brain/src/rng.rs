//! Deterministic random source for the simulation.
//!
//! A xoshiro128** generator seeded through splitmix32 expansion. State is
//! exactly four 32-bit words, so it can be captured into a snapshot and
//! restored on any instance to reproduce the identical future sequence.

use rand_core::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

const F32_SCALE: f32 = 1.0 / 16_777_216.0; // 2^-24

fn splitmix32(state: &mut u32) -> u32 {
    *state = state.wrapping_add(0x9E37_79B9);
    let mut z = *state;
    z = (z ^ (z >> 16)).wrapping_mul(0x21F0_AAAD);
    z = (z ^ (z >> 15)).wrapping_mul(0x735A_2D97);
    z ^ (z >> 15)
}

/// Seedable xoshiro128** generator with capturable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xoshiro128 {
    s: [u32; 4],
}

impl Xoshiro128 {
    /// Seed the generator, expanding the 64-bit seed via splitmix32.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let mut sm = (seed ^ (seed >> 32)) as u32;
        let mut s = [0u32; 4];
        for word in &mut s {
            *word = splitmix32(&mut sm);
        }
        if s == [0; 4] {
            s[0] = 0x9E37_79B9;
        }
        Self { s }
    }

    /// Current state words.
    #[must_use]
    pub const fn state(&self) -> [u32; 4] {
        self.s
    }

    /// Rebuild a generator from captured state; continues the identical
    /// sequence the capturing instance would have produced.
    #[must_use]
    pub const fn from_state(state: [u32; 4]) -> Self {
        Self { s: state }
    }

    #[inline]
    fn next_word(&mut self) -> u32 {
        let result = self.s[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = self.s[1] << 9;
        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];
        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(11);
        result
    }

    /// Uniform float in `[0, 1)`.
    #[inline]
    pub fn uniform(&mut self) -> f32 {
        (self.next_word() >> 8) as f32 * F32_SCALE
    }

    /// Uniform float in `[lo, hi)`.
    pub fn range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + self.uniform() * (hi - lo)
    }

    /// Uniform integer in `[lo, hi]`, inclusive on both ends.
    pub fn int_between(&mut self, lo: i32, hi: i32) -> i32 {
        if hi <= lo {
            return lo;
        }
        let span = (hi - lo) as u32 + 1;
        lo + (self.next_word() % span) as i32
    }

    /// Uniform index in `[0, len)`; `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0, "index needs a non-empty range");
        (self.next_word() as usize) % len
    }

    /// Gaussian sample via Box-Muller. The first uniform draw is retried
    /// while zero so the log argument is always positive.
    pub fn gaussian(&mut self, mean: f32, std_dev: f32) -> f32 {
        let mut u1 = self.uniform();
        while u1 <= 0.0 {
            u1 = self.uniform();
        }
        let u2 = self.uniform();
        let mag = (-2.0 * u1.ln()).sqrt();
        mean + std_dev * mag * (std::f32::consts::TAU * u2).cos()
    }

    /// Bernoulli draw with probability `p`.
    pub fn chance(&mut self, p: f32) -> bool {
        self.uniform() < p
    }

    /// Uniform pick from a slice; `None` when the slice is empty.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            let idx = self.index(items.len());
            Some(&items[idx])
        }
    }
}

impl RngCore for Xoshiro128 {
    fn next_u32(&mut self) -> u32 {
        self.next_word()
    }

    fn next_u64(&mut self) -> u64 {
        let lo = u64::from(self.next_word());
        let hi = u64::from(self.next_word());
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for chunk in dst.chunks_mut(4) {
            let word = self.next_word().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

impl SeedableRng for Xoshiro128 {
    type Seed = [u8; 16];

    fn from_seed(seed: Self::Seed) -> Self {
        let mut s = [0u32; 4];
        for (word, bytes) in s.iter_mut().zip(seed.chunks_exact(4)) {
            *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        if s == [0; 4] {
            s[0] = 0x9E37_79B9;
        }
        Self { s }
    }

    fn seed_from_u64(seed: u64) -> Self {
        Self::new(seed)
    }
}
