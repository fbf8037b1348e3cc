//! Gorilla-style XOR chunk: delta-of-delta timestamps and XOR-compressed
//! float values.
//!
//! Layout: a 2-byte big-endian sample count, then the bit stream. The first
//! sample holds a zigzag varint timestamp and the raw 64-bit value. The
//! second holds an unsigned varint timestamp delta. Every later sample holds
//! a bucketed delta-of-delta. Values after the first are XORed against their
//! predecessor.

use bytes::Bytes;

use super::bstream::{BitReader, BitWriter};
use super::{ChunkError, EncodedChunk, MAX_SAMPLES_PER_CHUNK, Sample};

const HEADER_LEN: usize = 2;
const MAX_VARINT_LEN: usize = 10;
// Marks "no leading/trailing window established yet".
const NO_WINDOW: u8 = 0xff;

/// Incremental encoder for one chunk.
#[derive(Debug, Clone)]
pub struct XorAppender {
    bw: BitWriter,
    num_samples: u16,
    min_time: i64,
    t: i64,
    v: u64,
    t_delta: u64,
    leading: u8,
    trailing: u8,
}

impl Default for XorAppender {
    fn default() -> Self {
        Self::new()
    }
}

impl XorAppender {
    pub fn new() -> Self {
        Self {
            bw: BitWriter::with_header(&[0; HEADER_LEN]),
            num_samples: 0,
            min_time: 0,
            t: 0,
            v: 0,
            t_delta: 0,
            leading: NO_WINDOW,
            trailing: 0,
        }
    }

    pub fn num_samples(&self) -> usize {
        usize::from(self.num_samples)
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    pub fn is_full(&self) -> bool {
        self.num_samples() >= MAX_SAMPLES_PER_CHUNK
    }

    /// Append a sample. Fails once the chunk holds the maximum sample count.
    pub fn append(&mut self, t: i64, v: f64) -> Result<(), ChunkError> {
        if self.is_full() {
            return Err(ChunkError::Full);
        }
        self.push(t, v);
        Ok(())
    }

    /// Append a sample to a chunk known to have room for it.
    pub(super) fn push(&mut self, t: i64, v: f64) {
        debug_assert!(!self.is_full());
        let v = v.to_bits();
        match self.num_samples {
            0 => {
                self.write_varint(zigzag(t));
                self.bw.write_bits(v, 64);
                self.min_time = t;
            }
            1 => {
                let t_delta = t.wrapping_sub(self.t) as u64;
                self.write_varint(t_delta);
                self.write_value(v);
                self.t_delta = t_delta;
            }
            _ => {
                let t_delta = t.wrapping_sub(self.t) as u64;
                let dod = t_delta.wrapping_sub(self.t_delta) as i64;
                self.write_dod(dod);
                self.write_value(v);
                self.t_delta = t_delta;
            }
        }

        self.t = t;
        self.v = v;
        self.num_samples += 1;
    }

    /// Seal the chunk, writing the sample count into its header.
    pub fn finish(self) -> EncodedChunk {
        let Self {
            mut bw,
            num_samples,
            min_time,
            t,
            ..
        } = self;
        bw.bytes_mut()[..HEADER_LEN].copy_from_slice(&num_samples.to_be_bytes());

        EncodedChunk {
            min_time,
            max_time: t,
            num_samples,
            data: Bytes::from(bw.into_inner()),
        }
    }

    fn write_varint(&mut self, value: u64) {
        let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
        prost::encoding::encode_varint(value, &mut buf);
        for byte in buf {
            self.bw.write_byte(byte);
        }
    }

    fn write_dod(&mut self, dod: i64) {
        match dod {
            0 => self.bw.write_bit(false),
            d if bit_range(d, 14) => {
                self.bw.write_bits(0b10, 2);
                self.bw.write_bits(d as u64, 14);
            }
            d if bit_range(d, 17) => {
                self.bw.write_bits(0b110, 3);
                self.bw.write_bits(d as u64, 17);
            }
            d if bit_range(d, 20) => {
                self.bw.write_bits(0b1110, 4);
                self.bw.write_bits(d as u64, 20);
            }
            d => {
                self.bw.write_bits(0b1111, 4);
                self.bw.write_bits(d as u64, 64);
            }
        }
    }

    fn write_value(&mut self, v: u64) {
        let delta = v ^ self.v;
        if delta == 0 {
            self.bw.write_bit(false);
            return;
        }
        self.bw.write_bit(true);

        // The leading count has a 5-bit field.
        let leading = (delta.leading_zeros() as u8).min(31);
        let trailing = delta.trailing_zeros() as u8;

        if self.leading != NO_WINDOW && leading >= self.leading && trailing >= self.trailing {
            self.bw.write_bit(false);
            let sigbits = 64 - u32::from(self.leading) - u32::from(self.trailing);
            self.bw.write_bits(delta >> self.trailing, sigbits);
            return;
        }

        self.leading = leading;
        self.trailing = trailing;
        self.bw.write_bit(true);
        self.bw.write_bits(u64::from(leading), 5);
        let sigbits = 64 - u32::from(leading) - u32::from(trailing);
        // 64 significant bits do not fit the 6-bit field and are written as 0.
        self.bw.write_bits(u64::from(sigbits) & 0x3f, 6);
        self.bw.write_bits(delta >> trailing, sigbits);
    }
}

/// Whether `x` fits a signed bucket of `nbits` bits.
fn bit_range(x: i64, nbits: u32) -> bool {
    -((1i64 << (nbits - 1)) - 1) <= x && x <= 1i64 << (nbits - 1)
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Iterates the samples of an encoded chunk. Yields at most one error.
#[derive(Debug, Clone)]
pub struct XorIterator<'a> {
    br: BitReader<'a>,
    total: u16,
    read: u16,
    t: i64,
    v: u64,
    t_delta: u64,
    leading: u8,
    trailing: u8,
    failed: bool,
}

impl<'a> XorIterator<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, ChunkError> {
        if data.len() < HEADER_LEN {
            return Err(ChunkError::Truncated);
        }
        let total = u16::from_be_bytes([data[0], data[1]]);

        Ok(Self {
            br: BitReader::new(&data[HEADER_LEN..]),
            total,
            read: 0,
            t: 0,
            v: 0,
            t_delta: 0,
            leading: NO_WINDOW,
            trailing: 0,
            failed: false,
        })
    }

    /// Sample count stored in the chunk header.
    pub fn num_samples(&self) -> usize {
        usize::from(self.total)
    }

    fn read_sample(&mut self) -> Result<Sample, ChunkError> {
        match self.read {
            0 => {
                self.t = unzigzag(self.read_varint()?);
                self.v = self.br.read_bits(64)?;
            }
            1 => {
                self.t_delta = self.read_varint()?;
                self.t = self.t.wrapping_add(self.t_delta as i64);
                self.read_value()?;
            }
            _ => {
                let dod = self.read_dod()?;
                self.t_delta = self.t_delta.wrapping_add(dod as u64);
                self.t = self.t.wrapping_add(self.t_delta as i64);
                self.read_value()?;
            }
        }

        Ok(Sample {
            t: self.t,
            v: f64::from_bits(self.v),
        })
    }

    fn read_varint(&mut self) -> Result<u64, ChunkError> {
        let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
        loop {
            let byte = self.br.read_byte()?;
            buf.push(byte);
            if byte & 0x80 == 0 {
                break;
            }
            if buf.len() == MAX_VARINT_LEN {
                return Err(ChunkError::InvalidVarint);
            }
        }
        prost::encoding::decode_varint(&mut buf.as_slice()).map_err(|_| ChunkError::InvalidVarint)
    }

    fn read_dod(&mut self) -> Result<i64, ChunkError> {
        let mut prefix = 0u8;
        for _ in 0..4 {
            prefix <<= 1;
            if !self.br.read_bit()? {
                break;
            }
            prefix |= 1;
        }

        let size = match prefix {
            0b0 => return Ok(0),
            0b10 => 14,
            0b110 => 17,
            0b1110 => 20,
            0b1111 => return Ok(self.br.read_bits(64)? as i64),
            _ => return Err(ChunkError::Corrupted("invalid timestamp bucket")),
        };

        let bits = self.br.read_bits(size)?;
        if bits > 1 << (size - 1) {
            Ok(bits as i64 - (1i64 << size))
        } else {
            Ok(bits as i64)
        }
    }

    fn read_value(&mut self) -> Result<(), ChunkError> {
        if !self.br.read_bit()? {
            return Ok(());
        }

        if self.br.read_bit()? {
            self.leading = self.br.read_bits(5)? as u8;
            let mut sigbits = self.br.read_bits(6)? as u8;
            if sigbits == 0 {
                sigbits = 64;
            }
            if u32::from(self.leading) + u32::from(sigbits) > 64 {
                return Err(ChunkError::Corrupted("value window exceeds 64 bits"));
            }
            self.trailing = 64 - self.leading - sigbits;
        } else if self.leading == NO_WINDOW {
            return Err(ChunkError::Corrupted("value window reused before it was set"));
        }

        let sigbits = 64 - u32::from(self.leading) - u32::from(self.trailing);
        let bits = self.br.read_bits(sigbits)?;
        self.v ^= bits << self.trailing;
        Ok(())
    }
}

impl Iterator for XorIterator<'_> {
    type Item = Result<Sample, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.read >= self.total {
            return None;
        }

        match self.read_sample() {
            Ok(sample) => {
                self.read += 1;
                Some(Ok(sample))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(samples: &[(i64, f64)]) -> EncodedChunk {
        let mut app = XorAppender::new();
        for &(t, v) in samples {
            app.append(t, v).unwrap();
        }
        app.finish()
    }

    fn decode(chunk: &EncodedChunk) -> Vec<(i64, u64)> {
        XorIterator::new(&chunk.data)
            .unwrap()
            .map(|s| {
                let s = s.unwrap();
                (s.t, s.v.to_bits())
            })
            .collect()
    }

    fn assert_lossless(samples: &[(i64, f64)]) {
        let chunk = encode(samples);
        let expected: Vec<(i64, u64)> = samples.iter().map(|&(t, v)| (t, v.to_bits())).collect();
        assert_eq!(decode(&chunk), expected);
        assert_eq!(usize::from(chunk.num_samples), samples.len());
    }

    #[test]
    fn test_zigzag() {
        for v in [0, 1, -1, 63, -64, i64::MAX, i64::MIN] {
            assert_eq!(unzigzag(zigzag(v)), v);
        }
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
    }

    #[test]
    fn test_regular_scrape_interval() {
        let start = 1_600_000_000_000;
        let samples: Vec<(i64, f64)> = (0..1000).map(|i| (start + i * 15_000, i as f64)).collect();
        assert_lossless(&samples);
    }

    #[test]
    fn test_every_timestamp_bucket() {
        // Deltas chosen so the delta-of-deltas hit every bucket size.
        let mut t = 0i64;
        let mut samples = vec![(t, 1.0)];
        for delta in [
            10, 10, 8202, 10, -8181, 65_546, 10, 524_298, 10, 1 << 40, -(1 << 41), 10,
        ] {
            t += delta;
            samples.push((t, 1.0));
        }
        assert_lossless(&samples);
    }

    #[test]
    fn test_extreme_timestamps() {
        assert_lossless(&[(i64::MIN, 0.0), (0, 1.0), (i64::MAX, 2.0)]);
        assert_lossless(&[(i64::MAX, 0.5)]);
        assert_lossless(&[(-5, 1.0), (-4, 1.0), (-2, 1.0)]);
    }

    #[test]
    fn test_special_float_values() {
        assert_lossless(&[
            (1, 0.0),
            (2, -0.0),
            (3, f64::NAN),
            (4, f64::from_bits(0x7ff8_0000_dead_beef)),
            (5, f64::INFINITY),
            (6, f64::NEG_INFINITY),
            (7, f64::MIN_POSITIVE),
            (8, f64::MAX),
            (9, 1.0),
            (10, 1.0),
            (11, -1.0),
        ]);
    }

    #[test]
    fn test_value_windows() {
        // Full-width XOR (64 significant bits) and windows that shrink and
        // grow against the previous one.
        assert_lossless(&[
            (1, f64::from_bits(0)),
            (2, f64::from_bits(u64::MAX)),
            (3, f64::from_bits(u64::MAX - 1)),
            (4, f64::from_bits(0x0000_0001_0000_0000)),
            (5, f64::from_bits(1)),
            (6, f64::from_bits(0x8000_0000_0000_0000)),
        ]);
    }

    #[test]
    fn test_header_and_bounds() {
        let chunk = encode(&[(10, 1.0), (20, 2.0), (35, 3.0)]);
        assert_eq!(&chunk.data[..2], &[0, 3]);
        assert_eq!(chunk.min_time, 10);
        assert_eq!(chunk.max_time, 35);

        let empty = XorAppender::new().finish();
        assert_eq!(empty.num_samples, 0);
        assert_eq!(&empty.data[..], &[0, 0]);
        assert!(decode(&empty).is_empty());
    }

    #[test]
    fn test_full_chunk_rejects_append() {
        let mut app = XorAppender::new();
        for i in 0..MAX_SAMPLES_PER_CHUNK as i64 {
            app.append(i, 0.0).unwrap();
        }
        assert!(app.is_full());
        assert_eq!(app.append(1 << 20, 0.0).unwrap_err(), ChunkError::Full);

        let chunk = app.finish();
        assert_eq!(&chunk.data[..2], &[0xff, 0xff]);
        assert_eq!(decode(&chunk).len(), MAX_SAMPLES_PER_CHUNK);
    }

    #[test]
    fn test_push_matches_append() {
        let mut pushed = XorAppender::new();
        let mut appended = XorAppender::new();
        for i in 0..500_i64 {
            let v = (i as f64).sin();
            pushed.push(i * 15_000, v);
            appended.append(i * 15_000, v).unwrap();
        }
        assert_eq!(pushed.finish(), appended.finish());
    }

    #[test]
    fn test_truncated_chunk() {
        let chunk = encode(&[(1, 1.5), (2, 2.5), (3, 3.5)]);
        let cut = &chunk.data[..chunk.data.len() - 2];

        let decoded: Vec<_> = XorIterator::new(cut).unwrap().collect();
        assert!(decoded.last().unwrap().is_err());
        assert!(decoded.len() <= 3);

        assert_eq!(XorIterator::new(&[0]).unwrap_err(), ChunkError::Truncated);
    }
}
