//! Adaptive multi-symbol arithmetic coder with fixed-width integer registers.
//!
//! Interval bounds live in `ARITH_BITS`-bit registers. Settled high bits are
//! shifted out as soon as both bounds agree (E1/E2); when the interval straddles
//! the midpoint inside the middle half (E3) the bounds are expanded and the bit
//! decision is deferred through a pending counter.
//!
//! Frequency tables start flat, gain `STEP` per coded symbol and are halved
//! once the total passes `RESCALE_THRESHOLD`, on both sides in lockstep.
use anyhow::Result;

use super::bitstream::{BitReader, BitWriter};

// ============================================================================
// Coder constants
// ============================================================================
pub const ARITH_BITS: u32 = 22;
const MASK: u32 = (1 << ARITH_BITS) - 1;
const MSB: u32 = 1 << (ARITH_BITS - 1);
const SECOND_MSB: u32 = 1 << (ARITH_BITS - 2);
/// Count added to a symbol each time it is coded.
const STEP: u32 = 8;
/// Tables are halved once their total exceeds this; keeps every symbol's
/// sub-interval non-empty after renormalization.
const RESCALE_THRESHOLD: u32 = 1 << (ARITH_BITS - 3);

// ============================================================================
// Adaptive frequency table
// ============================================================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyTable {
    counts: Vec<u32>,
    total: u32,
}

impl FrequencyTable {
    /// Flat table over `n_symbols` symbols (each count 1).
    pub fn new(n_symbols: usize) -> Self {
        Self { counts: vec![1; n_symbols], total: n_symbols as u32 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[inline]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// `(cumulative count below symbol, count of symbol)`.
    fn range_of(&self, symbol: usize) -> Result<(u32, u32)> {
        let Some(&count) = self.counts.get(symbol) else {
            anyhow::bail!("symbol {symbol} outside frequency table of {}", self.counts.len());
        };
        let cum = self.counts[..symbol].iter().sum();
        Ok((cum, count))
    }

    /// Symbol whose cumulative range contains `target`.
    fn find(&self, target: u32) -> Option<(usize, u32, u32)> {
        let mut cum = 0;
        for (symbol, &count) in self.counts.iter().enumerate() {
            if target < cum + count {
                return Some((symbol, cum, count));
            }
            cum += count;
        }
        None
    }

    pub fn update(&mut self, symbol: usize) {
        self.counts[symbol] += STEP;
        self.total += STEP;
        if self.total > RESCALE_THRESHOLD {
            self.rescale();
        }
    }

    fn rescale(&mut self) {
        let mut total = 0;
        for c in self.counts.iter_mut() {
            *c = (*c >> 1) + 1;
            total += *c;
        }
        self.total = total;
    }
}

// ============================================================================
// Encoder
// ============================================================================
pub struct ArithmeticEncoder {
    low: u32,
    high: u32,
    pending: u32,
    output: BitWriter,
}

impl Default for ArithmeticEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArithmeticEncoder {
    pub fn new() -> Self {
        Self { low: 0, high: MASK, pending: 0, output: BitWriter::new() }
    }

    #[inline]
    fn emit(&mut self, bit: u32) {
        self.output.write_bit(bit);
        while self.pending > 0 {
            self.output.write_bit(bit ^ 1);
            self.pending -= 1;
        }
    }

    /// Code `symbol` with `table`, then adapt the table.
    pub fn encode(&mut self, table: &mut FrequencyTable, symbol: usize) -> Result<()> {
        let (cum, count) = table.range_of(symbol)?;
        let total = table.total() as u64;
        let range = (self.high - self.low) as u64 + 1;
        self.high = self.low + ((range * (cum + count) as u64) / total) as u32 - 1;
        self.low += ((range * cum as u64) / total) as u32;
        if self.low > self.high {
            anyhow::bail!("arithmetic encoder bounds crossed");
        }

        loop {
            if (self.low & MSB) == (self.high & MSB) {
                let bit = self.low >> (ARITH_BITS - 1);
                self.emit(bit);
                self.low = (self.low << 1) & MASK;
                self.high = ((self.high << 1) & MASK) | 1;
            } else if (self.low & SECOND_MSB) != 0 && (self.high & SECOND_MSB) == 0 {
                self.low = ((self.low << 1) & MASK) ^ MSB;
                self.high = (((self.high << 1) & MASK) | 1) ^ MSB;
                self.pending += 1;
            } else {
                break;
            }
        }

        table.update(symbol);
        Ok(())
    }

    /// Flush the low bound so the decoder can resolve the final interval.
    pub fn finish(mut self) -> Vec<u8> {
        let low = self.low;
        self.emit(low >> (ARITH_BITS - 1));
        self.output.write_bits(low & (MSB - 1), ARITH_BITS - 1);
        self.output.finish()
    }
}

// ============================================================================
// Decoder
// ============================================================================
pub struct ArithmeticDecoder<'a> {
    low: u32,
    high: u32,
    tag: u32,
    input: BitReader<'a>,
}

impl<'a> ArithmeticDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut input = BitReader::new(data);
        let tag = input.read_bits(ARITH_BITS);
        Self { low: 0, high: MASK, tag, input }
    }

    /// Find the symbol under the tag and narrow the interval to it.
    fn locate(&mut self, table: &FrequencyTable) -> Result<usize> {
        let total = table.total() as u64;
        let range = (self.high - self.low) as u64 + 1;
        let Some(offset) = self.tag.checked_sub(self.low).filter(|_| self.tag <= self.high) else {
            anyhow::bail!("arithmetic decoder tag outside interval (corrupt stream)");
        };
        let target = ((offset as u64 + 1) * total - 1) / range;
        if target >= total {
            anyhow::bail!("arithmetic decoder target {target} out of range {total}");
        }
        let Some((symbol, cum, count)) = table.find(target as u32) else {
            anyhow::bail!("arithmetic decoder target {target} not found in table");
        };
        self.high = self.low + ((range * (cum + count) as u64) / total) as u32 - 1;
        self.low += ((range * cum as u64) / total) as u32;
        Ok(symbol)
    }

    /// Decode one symbol and adapt `table`.
    pub fn decode(&mut self, table: &mut FrequencyTable) -> Result<usize> {
        let symbol = self.locate(table)?;

        loop {
            if (self.low & MSB) == (self.high & MSB) {
                self.low = (self.low << 1) & MASK;
                self.high = ((self.high << 1) & MASK) | 1;
                self.tag = ((self.tag << 1) & MASK) | self.input.read_bit();
            } else if (self.low & SECOND_MSB) != 0 && (self.high & SECOND_MSB) == 0 {
                self.low = ((self.low << 1) & MASK) ^ MSB;
                self.high = (((self.high << 1) & MASK) | 1) ^ MSB;
                self.tag = (((self.tag << 1) & MASK) | self.input.read_bit()) ^ MSB;
            } else {
                break;
            }
        }

        table.update(symbol);
        Ok(symbol)
    }

    /// Decode the final symbol of a stream; no renormalization follows since
    /// there are no further bits to resolve.
    pub fn decode_last(&mut self, table: &mut FrequencyTable) -> Result<usize> {
        let symbol = self.locate(table)?;
        table.update(symbol);
        Ok(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(symbols: &[usize], n_symbols: usize) {
        let mut enc = ArithmeticEncoder::new();
        let mut table = FrequencyTable::new(n_symbols);
        for &s in symbols {
            enc.encode(&mut table, s).unwrap();
        }
        let bytes = enc.finish();

        let mut dec = ArithmeticDecoder::new(&bytes);
        let mut table = FrequencyTable::new(n_symbols);
        for (i, &s) in symbols.iter().enumerate() {
            let got = if i + 1 == symbols.len() {
                dec.decode_last(&mut table).unwrap()
            } else {
                dec.decode(&mut table).unwrap()
            };
            assert_eq!(got, s, "symbol {i} mismatch");
        }
    }

    #[test]
    fn test_arith_basic() {
        roundtrip(&[0, 1, 2, 3, 2, 1, 0], 4);
    }

    #[test]
    fn test_arith_single_symbol() {
        roundtrip(&[5], 6);
    }

    #[test]
    fn test_arith_skewed_with_rescale() {
        // Long enough to cross the rescale threshold many times.
        let symbols: Vec<usize> = (0..200_000).map(|i| if i % 97 == 0 { 1 } else { 0 }).collect();
        roundtrip(&symbols, 2);
    }

    #[test]
    fn test_arith_large_alphabet() {
        let mut x: u32 = 12345;
        let symbols: Vec<usize> = (0..20_000)
            .map(|_| {
                x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                ((x >> 16) % 72) as usize
            })
            .collect();
        roundtrip(&symbols, 72);
    }

    #[test]
    fn test_rescale_keeps_counts_positive() {
        let mut t = FrequencyTable::new(3);
        for _ in 0..100_000 {
            t.update(2);
        }
        assert!(t.total() <= RESCALE_THRESHOLD);
        assert!(t.counts.iter().all(|&c| c >= 1));
        assert_eq!(t.counts.iter().sum::<u32>(), t.total());
    }

    #[test]
    fn test_symbol_outside_table() {
        let mut enc = ArithmeticEncoder::new();
        let mut t = FrequencyTable::new(2);
        assert!(enc.encode(&mut t, 2).is_err());
    }
}
