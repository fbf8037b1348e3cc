//! Big-endian bit stream used by the XOR chunk encoding.

use super::ChunkError;

#[derive(Debug, Clone)]
pub(crate) struct BitWriter {
    buf: Vec<u8>,
    // Bits already used in the last byte; 8 means a fresh byte is needed.
    pos: u32,
}

impl BitWriter {
    /// Writer that keeps `header` as its first bytes and starts writing
    /// bits on the following byte boundary.
    pub(crate) fn with_header(header: &[u8]) -> Self {
        Self {
            buf: header.to_vec(),
            pos: 8,
        }
    }

    fn last_index(&self) -> usize {
        self.buf.len() - 1
    }

    pub(crate) fn write_bit(&mut self, bit: bool) {
        if self.pos == 8 {
            self.buf.push(0);
            self.pos = 0;
        }
        if bit {
            let i = self.last_index();
            self.buf[i] |= 1u8 << (7 - self.pos);
        }
        self.pos += 1;
    }

    pub(crate) fn write_byte(&mut self, byte: u8) {
        if self.pos == 8 {
            self.buf.push(byte);
            return;
        }

        let i = self.last_index();
        self.buf[i] |= byte >> self.pos;
        self.buf.push(byte << (8 - self.pos));
    }

    /// Write the `num` low bits of `bits`, most significant first.
    pub(crate) fn write_bits(&mut self, bits: u64, num: u32) {
        debug_assert!(num <= 64);
        if num == 0 {
            return;
        }

        let mut bits = bits << (64 - num);
        let mut num = num;
        while num >= 8 {
            self.write_byte((bits >> 56) as u8);
            bits <<= 8;
            num -= 8;
        }
        while num > 0 {
            self.write_bit(bits >> 63 == 1);
            bits <<= 1;
            num -= 1;
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    // Absolute bit offset into `data`.
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn read_bit(&mut self) -> Result<bool, ChunkError> {
        let byte = self.data.get(self.pos / 8).ok_or(ChunkError::Truncated)?;
        let bit = (byte >> (7 - self.pos % 8)) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8, ChunkError> {
        Ok(self.read_bits(8)? as u8)
    }

    pub(crate) fn read_bits(&mut self, num: u32) -> Result<u64, ChunkError> {
        debug_assert!(num <= 64);
        if self.pos + num as usize > self.data.len() * 8 {
            return Err(ChunkError::Truncated);
        }

        let mut bits = 0u64;
        for _ in 0..num {
            bits = (bits << 1) | u64::from(self.read_bit()?);
        }
        Ok(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_bits_unaligned() {
        let mut w = BitWriter::with_header(&[]);
        w.write_bit(true);
        w.write_bits(0b0101, 4);
        w.write_byte(0xff);
        w.write_bits(0x1234_5678_9abc_def0, 64);
        let data = w.into_inner();

        let mut r = BitReader::new(&data);
        assert!(r.read_bit().unwrap());
        assert_eq!(r.read_bits(4).unwrap(), 0b0101);
        assert_eq!(r.read_byte().unwrap(), 0xff);
        assert_eq!(r.read_bits(64).unwrap(), 0x1234_5678_9abc_def0);
        // Padding of the last byte reads as zeros, then the stream ends.
        assert_eq!(r.read_bits(3).unwrap(), 0);
        assert_eq!(r.read_bit().unwrap_err(), ChunkError::Truncated);
    }

    #[test]
    fn test_header_is_kept() {
        let mut w = BitWriter::with_header(&[0xab, 0xcd]);
        w.write_bit(true);
        assert_eq!(w.into_inner(), vec![0xab, 0xcd, 0b1000_0000]);
    }

    #[test]
    fn test_read_past_end() {
        let mut r = BitReader::new(&[0x0f]);
        assert_eq!(r.read_bits(9).unwrap_err(), ChunkError::Truncated);
        // A failed read does not consume anything.
        assert_eq!(r.read_bits(8).unwrap(), 0x0f);
    }
}
