//! WELL-1024a pseudo-random generator used as a reproducible bit source.
//!
//! Encoder and decoder start from the same 32-word state (stored in the archive)
//! and draw the same number of bits per symbol in the same order, so their
//! lo/hi quantizer choices agree.

use anyhow::Result;

/// Number of 32-bit words of generator state.
pub const WELL_STATE_WORDS: usize = 32;
/// Fill word of the default state.
const DEFAULT_FILL: u32 = 0x5555_5555;

const M1: usize = 3;
const M2: usize = 24;
const M3: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Well1024a {
    state: [u32; WELL_STATE_WORDS],
    n: usize,
    cache: u32,
    cache_bits: u32,
}

impl Default for Well1024a {
    fn default() -> Self {
        Self::from_state([DEFAULT_FILL; WELL_STATE_WORDS])
    }
}

impl Well1024a {
    pub fn from_state(state: [u32; WELL_STATE_WORDS]) -> Self {
        Self { state, n: 0, cache: 0, cache_bits: 0 }
    }

    /// Expand a 32-bit seed into a full state with the Knuth multiplicative
    /// recurrence.
    pub fn from_seed(seed: u32) -> Self {
        let mut state = [0u32; WELL_STATE_WORDS];
        state[0] = seed;
        for i in 1..WELL_STATE_WORDS {
            let prev = state[i - 1];
            state[i] = 1_812_433_253u32
                .wrapping_mul(prev ^ (prev >> 30))
                .wrapping_add(i as u32);
        }
        Self::from_state(state)
    }

    pub fn write_state(&self, out: &mut Vec<u8>) {
        for word in &self.state {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    pub fn read_state(data: &[u8], offset: &mut usize) -> Result<Self> {
        let mut state = [0u32; WELL_STATE_WORDS];
        for word in state.iter_mut() {
            *word = super::read_le_u32(data, *offset)?;
            *offset += 4;
        }
        Ok(Self::from_state(state))
    }

    #[inline]
    fn at(&self, offset: usize) -> u32 {
        self.state[(self.n + offset) & 31]
    }

    /// Next full 32-bit output.
    pub fn next_u32(&mut self) -> u32 {
        let z0 = self.at(31);
        let vm1 = self.at(M1);
        let z1 = self.state[self.n] ^ (vm1 ^ (vm1 >> 8));
        let vm2 = self.at(M2);
        let vm3 = self.at(M3);
        let z2 = (vm2 ^ (vm2 << 19)) ^ (vm3 ^ (vm3 << 14));
        self.state[self.n] = z1 ^ z2;
        let idx = (self.n + 31) & 31;
        self.state[idx] = (z0 ^ (z0 << 11)) ^ (z1 ^ (z1 << 7)) ^ (z2 ^ (z2 << 13));
        self.n = idx;
        self.state[self.n]
    }

    /// `bits` uniform bits (1..=32) taken from a cached output word.
    ///
    /// When the cache holds fewer bits than requested, the leftover bits become
    /// the high part of the result and the low part comes from a fresh word.
    pub fn next_bits(&mut self, bits: u32) -> u32 {
        debug_assert!((1..=32).contains(&bits));
        if self.cache_bits >= bits {
            return self.take(bits);
        }
        let have = self.cache_bits;
        let high = self.cache;
        let low_bits = bits - have;
        self.cache = self.next_u32();
        self.cache_bits = 32;
        let low = self.take(low_bits);
        (high.checked_shl(low_bits).unwrap_or(0)) | low
    }

    #[inline]
    fn take(&mut self, bits: u32) -> u32 {
        let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
        let value = self.cache & mask;
        self.cache = self.cache.checked_shr(bits).unwrap_or(0);
        self.cache_bits -= bits;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_seeds_agree() {
        let mut a = Well1024a::from_seed(2024);
        let mut b = Well1024a::from_seed(2024);
        let xs: Vec<u32> = (0..1000).map(|_| a.next_bits(7)).collect();
        let ys: Vec<u32> = (0..1000).map(|_| b.next_bits(7)).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|&x| x < 128));
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = Well1024a::from_seed(1);
        let mut b = Well1024a::from_seed(2);
        let xs: Vec<u32> = (0..64).map(|_| a.next_u32()).collect();
        let ys: Vec<u32> = (0..64).map(|_| b.next_u32()).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn test_bit_draws_cover_range() {
        let mut w = Well1024a::default();
        let mut seen = [false; 128];
        for _ in 0..10_000 {
            seen[w.next_bits(7) as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_full_word_draws() {
        let mut a = Well1024a::default();
        let mut b = Well1024a::default();
        assert_eq!(a.next_bits(32), b.next_u32());
        // 32 = 7 * 4 + 4: the fifth draw straddles two words.
        let mut c = Well1024a::default();
        let w0 = Well1024a::default().next_u32();
        for i in 0..4 {
            assert_eq!(c.next_bits(7), (w0 >> (7 * i)) & 0x7f);
        }
        let straddle = c.next_bits(7);
        assert_eq!(straddle >> 3, w0 >> 28);
    }

    #[test]
    fn test_state_roundtrip() {
        let w = Well1024a::from_seed(77);
        let mut buf = Vec::new();
        w.write_state(&mut buf);
        assert_eq!(buf.len(), WELL_STATE_WORDS * 4);
        let mut offset = 0;
        let r = Well1024a::read_state(&buf, &mut offset).unwrap();
        assert_eq!(r, w);
        assert_eq!(offset, buf.len());
        assert!(Well1024a::read_state(&buf[..10], &mut 0).is_err());
    }
}
