//! MSB-first bit I/O over in-memory buffers.

/// Appends bits to a byte vector, most significant bit first.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    filled: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn write_bit(&mut self, bit: u32) {
        self.current = (self.current << 1) | (bit & 1) as u8;
        self.filled += 1;
        if self.filled == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }

    /// Write the low `count` bits of `value`, high bit first.
    pub fn write_bits(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1);
        }
    }

    /// Pad the final byte with zeros and return the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.bytes.push(self.current << (8 - self.filled));
        }
        self.bytes
    }
}

/// Reads bits from a byte slice, most significant bit first. Reading past the
/// end yields zero bits.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn read_bit(&mut self) -> u32 {
        let bit = match self.data.get(self.pos / 8) {
            Some(&byte) => ((byte >> (7 - (self.pos % 8))) & 1) as u32,
            None => 0,
        };
        self.pos += 1;
        bit
    }

    pub fn read_bits(&mut self, count: u32) -> u32 {
        (0..count).fold(0, |acc, _| (acc << 1) | self.read_bit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_bits() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        w.write_bits(0x3ff, 10);
        w.write_bit(0);
        let bytes = w.finish();
        assert_eq!(bytes, vec![0b1011_1111, 0b1111_1000]);

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bits(3), 0b101);
        assert_eq!(r.read_bits(10), 0x3ff);
        assert_eq!(r.read_bit(), 0);
    }

    #[test]
    fn test_read_past_end_is_zero() {
        let mut r = BitReader::new(&[0xff]);
        assert_eq!(r.read_bits(8), 0xff);
        assert_eq!(r.read_bits(8), 0);
        assert_eq!(r.read_bit(), 0);
    }
}
