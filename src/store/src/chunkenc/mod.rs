//! Sample chunk encoding.
//!
//! Series are shipped as a sequence of XOR chunks. Each chunk holds at most
//! [`MAX_SAMPLES_PER_CHUNK`] samples because its header stores the count in
//! 16 bits. Chunk boundaries depend only on the input sample sequence.

mod bstream;
mod xor;

use bytes::Bytes;

pub use xor::{XorAppender, XorIterator};

/// Upper bound of samples in one encoded chunk.
pub const MAX_SAMPLES_PER_CHUNK: usize = u16::MAX as usize;

/// A single float sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Timestamp in milliseconds since epoch
    pub t: i64,
    pub v: f64,
}

impl Sample {
    pub fn new(t: i64, v: f64) -> Self {
        Self { t, v }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk is full")]
    Full,
    #[error("chunk data truncated")]
    Truncated,
    #[error("invalid varint in chunk data")]
    InvalidVarint,
    #[error("corrupted chunk: {0}")]
    Corrupted(&'static str),
}

/// A sealed XOR chunk with the time range of its samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub min_time: i64,
    pub max_time: i64,
    pub num_samples: u16,
    pub data: Bytes,
}

impl EncodedChunk {
    pub fn decode(&self) -> Result<Vec<Sample>, ChunkError> {
        decode(&self.data)
    }
}

/// Encode the next chunk from a fallible sample source.
///
/// Pulls samples until the chunk is full or the source is exhausted, and
/// never pulls a sample that would not fit. Returns `Ok(None)` once the
/// source yields nothing more.
pub fn next_chunk<I, E>(samples: &mut I) -> Result<Option<EncodedChunk>, E>
where
    I: Iterator<Item = Result<Sample, E>>,
{
    let mut app = XorAppender::new();
    while !app.is_full() {
        let Some(sample) = samples.next() else {
            break;
        };
        let sample = sample?;
        app.push(sample.t, sample.v);
    }

    if app.is_empty() {
        Ok(None)
    } else {
        Ok(Some(app.finish()))
    }
}

/// Split an ordered sample sequence into consecutive chunks, filling each to
/// the maximum before starting the next.
pub fn split_into_chunks(samples: impl IntoIterator<Item = Sample>) -> Vec<EncodedChunk> {
    let mut samples = samples
        .into_iter()
        .map(Ok::<Sample, std::convert::Infallible>);
    let mut chunks = Vec::new();
    while let Ok(Some(chunk)) = next_chunk(&mut samples) {
        chunks.push(chunk);
    }
    chunks
}

/// Decode every sample of an encoded chunk.
pub fn decode(data: &[u8]) -> Result<Vec<Sample>, ChunkError> {
    let iter = XorIterator::new(data)?;
    let mut samples = Vec::with_capacity(iter.num_samples());
    for sample in iter {
        samples.push(sample?);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<Sample> {
        (0..n as i64).map(|i| Sample::new(i * 10, (i % 7) as f64)).collect()
    }

    #[test]
    fn test_split_chunk_counts() {
        let cases = [
            (0, vec![]),
            (1, vec![1]),
            (MAX_SAMPLES_PER_CHUNK, vec![MAX_SAMPLES_PER_CHUNK]),
            (MAX_SAMPLES_PER_CHUNK + 1, vec![MAX_SAMPLES_PER_CHUNK, 1]),
            (
                2 * MAX_SAMPLES_PER_CHUNK + 1,
                vec![MAX_SAMPLES_PER_CHUNK, MAX_SAMPLES_PER_CHUNK, 1],
            ),
        ];

        for (n, expected) in cases {
            let chunks = split_into_chunks(samples(n));
            let counts: Vec<usize> = chunks.iter().map(|c| usize::from(c.num_samples)).collect();
            assert_eq!(counts, expected, "split of {n} samples");
        }
    }

    #[test]
    fn test_split_preserves_samples_in_order() {
        let input = samples(2 * MAX_SAMPLES_PER_CHUNK + 1);
        let chunks = split_into_chunks(input.clone());

        let mut decoded = Vec::new();
        let mut last_max = i64::MIN;
        for chunk in &chunks {
            assert!(chunk.min_time > last_max, "chunks overlap");
            assert!(chunk.min_time <= chunk.max_time);
            last_max = chunk.max_time;
            decoded.extend(chunk.decode().unwrap());
        }
        assert_eq!(decoded, input);

        // Chunk boundaries sit exactly at the sample count limit.
        assert_eq!(chunks[1].min_time, input[MAX_SAMPLES_PER_CHUNK].t);
        assert_eq!(chunks[2].min_time, input[2 * MAX_SAMPLES_PER_CHUNK].t);
    }

    #[test]
    fn test_split_is_deterministic() {
        let a = split_into_chunks(samples(MAX_SAMPLES_PER_CHUNK + 10));
        let b = split_into_chunks(samples(MAX_SAMPLES_PER_CHUNK + 10));
        assert_eq!(a, b);
    }

    #[test]
    fn test_next_chunk_stops_on_error() {
        let results = vec![
            Ok(Sample::new(1, 1.0)),
            Err("boom"),
            Ok(Sample::new(3, 3.0)),
        ];
        let mut source = results.into_iter();
        assert_eq!(next_chunk(&mut source).unwrap_err(), "boom");
        // The sample after the error is still available to the caller.
        assert_eq!(source.next(), Some(Ok(Sample::new(3, 3.0))));
    }

    #[test]
    fn test_next_chunk_does_not_overpull() {
        let input = samples(MAX_SAMPLES_PER_CHUNK + 2);
        let mut source = input.into_iter().map(Ok::<_, ()>);
        let first = next_chunk(&mut source).unwrap().unwrap();
        assert_eq!(usize::from(first.num_samples), MAX_SAMPLES_PER_CHUNK);
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(&[]).unwrap_err(), ChunkError::Truncated);
        // Claims one sample but carries no data.
        assert_eq!(decode(&[0, 1]).unwrap_err(), ChunkError::Truncated);
    }
}
