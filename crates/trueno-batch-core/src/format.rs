//! Host-side view of the compressed output layout.
//!
//! A compressed output is `chunk_count` little-endian `u64` chunk sizes
//! followed by the compressed chunks, back to back.

use crate::codec::ChunkCodec;
use crate::plan::ceil_div;
use crate::{Error, Result};

/// Header bytes per chunk.
pub const METADATA_BYTES_PER_CHUNK: usize = 8;

/// Header length for `chunk_count` chunks.
#[inline]
#[must_use]
pub const fn header_len(chunk_count: usize) -> usize {
    chunk_count * METADATA_BYTES_PER_CHUNK
}

/// A parsed compressed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedOutput<'a> {
    payload: &'a [u8],
    sizes: Vec<u64>,
}

impl<'a> CompressedOutput<'a> {
    /// Parse `bytes` as an output with `chunk_count` chunks.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedData` if the buffer is shorter than its header or
    /// the header sizes do not add up to the buffer length.
    pub fn parse(bytes: &'a [u8], chunk_count: usize) -> Result<Self> {
        let header = header_len(chunk_count);
        if bytes.len() < header {
            return Err(Error::CorruptedData(format!(
                "{} bytes cannot hold a {chunk_count}-chunk header",
                bytes.len()
            )));
        }

        let sizes: Vec<u64> = bytes[..header]
            .chunks_exact(METADATA_BYTES_PER_CHUNK)
            .map(|word| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(word);
                u64::from_le_bytes(raw)
            })
            .collect();
        let payload = &bytes[header..];
        validate_sizes(&sizes, payload.len())?;

        Ok(Self { payload, sizes })
    }

    /// Number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.sizes.len()
    }

    /// Compressed size of each chunk.
    #[must_use]
    pub fn chunk_sizes(&self) -> &[u64] {
        &self.sizes
    }

    /// Header length in bytes.
    #[must_use]
    pub fn header_len(&self) -> usize {
        header_len(self.sizes.len())
    }

    /// Total compressed chunk bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Compressed chunks in order.
    pub fn chunks(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        let payload = self.payload;
        self.sizes.iter().scan(0usize, move |offset, &size| {
            let start = *offset;
            *offset += size as usize;
            Some(&payload[start..*offset])
        })
    }
}

/// Check that non-zero chunk sizes add up to exactly `payload_len`.
pub(crate) fn validate_sizes(sizes: &[u64], payload_len: usize) -> Result<()> {
    if let Some(chunk) = sizes.iter().position(|&s| s == 0) {
        return Err(Error::CorruptedData(format!("chunk {chunk} has zero compressed size")));
    }
    let total = sizes.iter().try_fold(0u64, |acc, &s| acc.checked_add(s));
    match total {
        Some(total) if total == payload_len as u64 => Ok(()),
        _ => Err(Error::CorruptedData(format!(
            "header sizes do not add up to the {payload_len}-byte payload"
        ))),
    }
}

/// Restore one compressed output on the host, chunk by chunk.
///
/// # Errors
///
/// Returns `CorruptedData` for a malformed layout or chunk, and
/// `InvalidConfig` for an out-of-range chunk size.
pub fn decompress_on_host(
    codec: &dyn ChunkCodec,
    bytes: &[u8],
    original_len: usize,
    chunk_size: usize,
) -> Result<Vec<u8>> {
    crate::plan::validate_chunk_size(chunk_size)?;
    let chunk_count = ceil_div(original_len, chunk_size);
    let parsed = CompressedOutput::parse(bytes, chunk_count)?;

    let mut output = vec![0u8; original_len];
    for (index, (chunk, dst)) in parsed.chunks().zip(output.chunks_mut(chunk_size)).enumerate() {
        let written = codec.decompress_chunk(chunk, dst)?;
        if written != dst.len() {
            return Err(Error::CorruptedData(format!(
                "chunk {index} decompressed to {written} bytes, expected {}",
                dst.len()
            )));
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{compress_bound, Lz4Codec, HASH_TABLE_BYTES};
    use crate::plan::MIN_CHUNK_SIZE;

    fn encode(input: &[u8], chunk_size: usize) -> Vec<u8> {
        let mut header = Vec::new();
        let mut payload = Vec::new();
        let mut scratch = vec![0u8; HASH_TABLE_BYTES];
        for chunk in input.chunks(chunk_size) {
            let mut out = vec![0u8; compress_bound(chunk.len())];
            let n = Lz4Codec.compress_chunk(chunk, &mut out, &mut scratch).unwrap();
            header.extend_from_slice(&(n as u64).to_le_bytes());
            payload.extend_from_slice(&out[..n]);
        }
        header.extend_from_slice(&payload);
        header
    }

    #[test]
    fn test_parse_and_iterate() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u64.to_le_bytes());
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(&[1, 1, 1, 2, 2]);

        let parsed = CompressedOutput::parse(&bytes, 2).unwrap();
        assert_eq!(parsed.chunk_sizes(), &[3, 2]);
        assert_eq!(parsed.header_len(), 16);
        assert_eq!(parsed.payload_len(), 5);
        let chunks: Vec<&[u8]> = parsed.chunks().collect();
        assert_eq!(chunks, vec![&[1u8, 1, 1][..], &[2u8, 2][..]]);
    }

    #[test]
    fn test_parse_empty() {
        let parsed = CompressedOutput::parse(&[], 0).unwrap();
        assert_eq!(parsed.chunk_count(), 0);
    }

    #[test]
    fn test_parse_short_header() {
        assert!(matches!(CompressedOutput::parse(&[0; 12], 2), Err(Error::CorruptedData(_))));
    }

    #[test]
    fn test_parse_size_mismatch() {
        let mut bytes = 10u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 9]);
        assert!(CompressedOutput::parse(&bytes, 1).is_err());
    }

    #[test]
    fn test_parse_huge_size_rejected() {
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.push(0);
        assert!(CompressedOutput::parse(&bytes, 2).is_err());
    }

    #[test]
    fn test_decompress_on_host_roundtrip() {
        let input: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let bytes = encode(&input, MIN_CHUNK_SIZE);
        let restored = decompress_on_host(&Lz4Codec, &bytes, input.len(), MIN_CHUNK_SIZE).unwrap();
        assert_eq!(restored, input);
    }

    #[test]
    fn test_decompress_on_host_empty() {
        assert!(decompress_on_host(&Lz4Codec, &[], 0, MIN_CHUNK_SIZE).unwrap().is_empty());
    }

    #[test]
    fn test_decompress_on_host_wrong_length() {
        let input = vec![5u8; 1000];
        let bytes = encode(&input, MIN_CHUNK_SIZE);
        assert!(decompress_on_host(&Lz4Codec, &bytes, 999, MIN_CHUNK_SIZE).is_err());
    }
}
