//! Per-chunk codecs run inside batched kernel launches.

mod lz4;

pub use lz4::{compress_bound, Lz4Codec, HASH_TABLE_BYTES};

use crate::Result;

/// A block codec applied independently to each chunk of a batch.
///
/// Implementations must be stateless across calls: every group of a launch
/// calls the codec concurrently with its own input, output and scratch
/// slices.
pub trait ChunkCodec: Send + Sync {
    /// Short codec name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Worst-case compressed size of a chunk of `chunk_size` bytes.
    fn max_output_chunk_size(&self, chunk_size: usize) -> usize;

    /// Scratch bytes one chunk needs while compressing.
    fn temp_bytes_per_chunk(&self, chunk_size: usize) -> usize;

    /// Scratch bytes for compressing `chunk_count` chunks in one launch.
    fn temp_buffer_size(&self, chunk_count: usize, chunk_size: usize) -> usize {
        chunk_count * self.temp_bytes_per_chunk(chunk_size)
    }

    /// Compress `input` into `output`, returning the compressed length.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` if `output` or `scratch` is undersized.
    fn compress_chunk(&self, input: &[u8], output: &mut [u8], scratch: &mut [u8]) -> Result<usize>;

    /// Decompress `input` into `output`, returning the decompressed length.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedData` for malformed input and `BufferTooSmall` if
    /// `output` cannot hold the result.
    fn decompress_chunk(&self, input: &[u8], output: &mut [u8]) -> Result<usize>;
}
