//! Deterministic proportional share allocation.
//!
//! The pool is cut at `n - 1` distinct random points in `1..=99` (percent).
//! The `n` gaps between consecutive cuts, `0` and `100` are sorted ascending,
//! and slot `i` receives `floor(size / 100) * gaps[i]`.
//!
//! Consequences callers rely on:
//! - the cuts come from an ARC4 stream keyed by the seed string, bit-compatible
//!   with the `seedrandom` generator, so every deployment that ever paid out an
//!   envelope agrees on its shares
//! - the shares of all slots sum to `floor(size / 100) * 100`; the remainder
//!   `size % 100` is never distributed
//! - slot `i` gets the i-th *smallest* gap, so claim order does not map to the
//!   order the cuts were drawn in

use alloy::primitives::U256;

use crate::envelope::types::MAX_RECIPIENTS;

/// Percent scale the pool is cut on.
pub const CUT_SCALE: u8 = 100;

/// Keystream bytes thrown away after keying.
const DROP_BYTES: usize = 256;
/// Bytes drawn for the first 48 bits of a sample.
const CHUNK_BYTES: usize = 6;

const START_DENOM: f64 = 281_474_976_710_656.0; // 2^48
const SIGNIFICANCE: f64 = 4_503_599_627_370_496.0; // 2^52
const OVERFLOW: f64 = 9_007_199_254_740_992.0; // 2^53

/// Fold a seed string into an ARC4 key.
///
/// Works on UTF-16 code units and wraps the key at 256 entries.
fn mix_key(seed: &str) -> Vec<u8> {
    let mut key: Vec<u8> = Vec::new();
    let mut smear: u32 = 0;

    for (j, unit) in seed.encode_utf16().enumerate() {
        let slot = j & 0xff;
        let current = key.get(slot).copied().unwrap_or(0);
        smear ^= u32::from(current) * 19;
        let mixed = (smear.wrapping_add(u32::from(unit)) & 0xff) as u8;
        match key.get_mut(slot) {
            Some(k) => *k = mixed,
            None => key.push(mixed),
        }
    }
    key
}

/// Seeded ARC4 generator yielding `f64` samples in `[0, 1)` with 52 bits of precision.
pub struct SeededRng {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl SeededRng {
    pub fn new(seed: &str) -> Self {
        let mut key = mix_key(seed);
        if key.is_empty() {
            key.push(0);
        }

        let mut state = [0u8; 256];
        for (n, s) in state.iter_mut().enumerate() {
            *s = n as u8;
        }
        let mut j: u8 = 0;
        for i in 0..state.len() {
            j = j.wrapping_add(key[i % key.len()]).wrapping_add(state[i]);
            state.swap(i, j as usize);
        }

        let mut rng = Self { state, i: 0, j: 0 };
        for _ in 0..DROP_BYTES {
            rng.next_byte();
        }
        rng
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        let t = self.state[self.i as usize];
        self.j = self.j.wrapping_add(t);
        self.state.swap(self.i as usize, self.j as usize);
        self.state[self.state[self.i as usize].wrapping_add(t) as usize]
    }

    /// Big-endian integer of the next `count` keystream bytes.
    fn next_bytes(&mut self, count: usize) -> u64 {
        (0..count).fold(0u64, |acc, _| acc * 256 + u64::from(self.next_byte()))
    }

    /// Next sample in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        let mut n = self.next_bytes(CHUNK_BYTES) as f64;
        let mut d = START_DENOM;
        let mut x: u64 = 0;

        while n < SIGNIFICANCE {
            n = (n + x as f64) * 256.0;
            d *= 256.0;
            x = self.next_bytes(1);
        }
        while n >= OVERFLOW {
            n /= 2.0;
            d /= 2.0;
            x >>= 1;
        }
        (n + x as f64) / d
    }

    /// Uniform integer in `min..=max`.
    pub fn next_int(&mut self, min: u8, max: u8) -> u8 {
        let span = f64::from(max) - f64::from(min) + 1.0;
        (self.next_f64() * span + f64::from(min)).floor() as u8
    }
}

/// The ascending gaps for `num_recipients` slots, or `None` if the count is out of range.
pub fn sorted_gaps(seed: &str, num_recipients: u8) -> Option<Vec<u8>> {
    if !(1..=MAX_RECIPIENTS).contains(&num_recipients) {
        return None;
    }

    let mut rng = SeededRng::new(seed);
    let mut cuts: Vec<u8> = Vec::with_capacity(num_recipients as usize + 1);
    while cuts.len() < num_recipients as usize - 1 {
        let cut = rng.next_int(1, CUT_SCALE - 1);
        if !cuts.contains(&cut) {
            cuts.push(cut);
        }
    }
    cuts.push(0);
    cuts.push(CUT_SCALE);
    cuts.sort_unstable();

    let mut gaps: Vec<u8> = cuts.windows(2).map(|w| w[1] - w[0]).collect();
    gaps.sort_unstable();
    Some(gaps)
}

/// Share of slot `index` out of a pool of `size`.
///
/// Returns `None` when `num_recipients` is outside `1..=16` or `index` is not a slot.
pub fn share(seed: &str, num_recipients: u8, size: U256, index: usize) -> Option<U256> {
    let gaps = sorted_gaps(seed, num_recipients)?;
    let gap = *gaps.get(index)?;
    let unit = size / U256::from(CUT_SCALE);
    Some(unit * U256::from(gap))
}
