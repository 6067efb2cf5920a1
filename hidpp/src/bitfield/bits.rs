//! MSB-first bit packing used by [`super::BitMessage`].

/// Appends values to a byte buffer bit by bit, starting with the most
/// significant bit of the first byte.
#[derive(Default)]
pub(crate) struct BitWriter {
    buf: Vec<u8>,
    len: usize,
}

impl BitWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push_bit(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.buf.push(0);
        }
        if bit {
            self.buf[self.len / 8] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    /// Appends the `bits` least significant bits of `value`.
    pub(crate) fn push_uint(&mut self, value: u64, bits: u16) {
        for shift in (0..bits).rev() {
            self.push_bit(shift < 64 && (value >> shift) & 1 == 1);
        }
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.push_uint(u64::from(*byte), 8);
        }
    }

    /// Number of bits written so far.
    #[cfg(test)]
    fn bit_len(&self) -> usize {
        self.len
    }

    /// Returns the written bits, with the last byte zero-padded on the right.
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads values from a byte buffer bit by bit, mirroring [`BitWriter`].
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bits left before the end of the buffer.
    pub(crate) fn remaining(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    fn read_bit(&mut self) -> bool {
        let bit = self.data[self.pos / 8] & (0x80 >> (self.pos % 8)) != 0;
        self.pos += 1;
        bit
    }

    /// Reads `bits` bits into the least significant end of an integer.
    ///
    /// Callers check [`Self::remaining`] first; bits beyond 64 are dropped
    /// from the most significant end.
    pub(crate) fn read_uint(&mut self, bits: u16) -> u64 {
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | u64::from(self.read_bit());
        }
        value
    }

    pub(crate) fn read_bytes(&mut self, count: usize) -> Vec<u8> {
        (0..count).map(|_| self.read_uint(8) as u8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_unaligned_fields_msb_first() {
        let mut writer = BitWriter::new();
        writer.push_uint(0b101, 3);
        writer.push_uint(0b1, 1);
        writer.push_uint(0xabc, 12);
        assert_eq!(writer.bit_len(), 16);
        assert_eq!(writer.into_bytes(), vec![0b1011_1010, 0xbc]);
    }

    #[test]
    fn reader_mirrors_writer() {
        let data = [0b1011_1010, 0xbc, 0x12];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_uint(3), 0b101);
        assert_eq!(reader.read_uint(1), 1);
        assert_eq!(reader.read_uint(12), 0xabc);
        assert_eq!(reader.remaining(), 8);
        assert_eq!(reader.read_bytes(1), vec![0x12]);
    }

    #[test]
    fn trailing_partial_byte_is_zero_padded() {
        let mut writer = BitWriter::new();
        writer.push_uint(0b11, 2);
        assert_eq!(writer.into_bytes(), vec![0b1100_0000]);
    }
}
