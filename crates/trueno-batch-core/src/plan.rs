//! Chunk planning.
//!
//! Splits logical buffers into fixed-size chunks and packs the chunks'
//! worst-case outputs into bounded-size intermediate buffers. Planning is pure
//! host arithmetic; nothing here touches the device.

use serde::Serialize;

use crate::{Error, Result};

/// Smallest accepted chunk size (32 KiB).
pub const MIN_CHUNK_SIZE: usize = 32 * 1024;

/// Largest accepted chunk size (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Largest total chunk count a single batch can index.
pub const MAX_TOTAL_CHUNKS: usize = u32::MAX as usize;

/// Check `chunk_size` against [`MIN_CHUNK_SIZE`] and [`MAX_CHUNK_SIZE`].
///
/// # Errors
///
/// Returns `InvalidConfig` when the size is out of range.
pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
        return Err(Error::InvalidConfig(format!(
            "chunk size {chunk_size} outside [{MIN_CHUNK_SIZE}, {MAX_CHUNK_SIZE}]"
        )));
    }
    Ok(())
}

/// Integer ceiling division. `divisor` must be non-zero.
#[inline]
#[must_use]
pub const fn ceil_div(value: usize, divisor: usize) -> usize {
    value / divisor + (value % divisor != 0) as usize
}

/// Chunk range of one input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkSpan {
    /// Index of the input buffer.
    pub input: usize,
    /// Byte length of the input buffer.
    pub len: usize,
    /// Global index of the first chunk.
    pub first_chunk: usize,
    /// Number of chunks (`ceil(len / chunk_size)`).
    pub chunk_count: usize,
}

/// One planned chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedChunk {
    /// Index of the input buffer the chunk belongs to.
    pub input: usize,
    /// Global chunk index across the whole batch.
    pub index: usize,
    /// Byte offset within the input buffer.
    pub offset: usize,
    /// Byte length, never zero.
    pub len: usize,
}

/// Deterministic chunking of a batch of buffers.
///
/// Global chunk indices follow input order, then offset order within an
/// input. Only the last chunk of an input may be short.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkPlan {
    chunk_size: usize,
    total_chunks: usize,
    spans: Vec<ChunkSpan>,
}

impl ChunkPlan {
    /// Plan the chunks of buffers with the given lengths.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an out-of-range chunk size and
    /// `TooManyChunks` when the total exceeds [`MAX_TOTAL_CHUNKS`].
    pub fn new(lengths: &[usize], chunk_size: usize) -> Result<Self> {
        validate_chunk_size(chunk_size)?;

        let mut spans = Vec::with_capacity(lengths.len());
        let mut total = 0usize;
        for (input, &len) in lengths.iter().enumerate() {
            let chunk_count = ceil_div(len, chunk_size);
            spans.push(ChunkSpan { input, len, first_chunk: total, chunk_count });
            total = total
                .checked_add(chunk_count)
                .filter(|&t| t <= MAX_TOTAL_CHUNKS)
                .ok_or_else(|| {
                    Error::TooManyChunks(format!(
                        "input {input} pushes the batch past {MAX_TOTAL_CHUNKS} chunks"
                    ))
                })?;
        }

        Ok(Self { chunk_size, total_chunks: total, spans })
    }

    /// Configured chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total chunks across all inputs.
    #[must_use]
    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    /// Number of planned inputs.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.spans.len()
    }

    /// Per-input chunk ranges, in input order.
    #[must_use]
    pub fn spans(&self) -> &[ChunkSpan] {
        &self.spans
    }

    /// All chunks in global index order.
    pub fn chunks(&self) -> impl Iterator<Item = PlannedChunk> + '_ {
        let chunk_size = self.chunk_size;
        self.spans.iter().flat_map(move |span| {
            (0..span.chunk_count).map(move |k| {
                let offset = k * chunk_size;
                PlannedChunk {
                    input: span.input,
                    index: span.first_chunk + k,
                    offset,
                    len: chunk_size.min(span.len - offset),
                }
            })
        })
    }
}

/// Packing of chunk output slots into intermediate device buffers.
///
/// Every chunk gets a slot of the codec's worst-case output size. A buffer
/// holds `max(target, slot) / slot` slots; the last buffer holds the
/// remainder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntermediatePlan {
    slot_size: usize,
    chunks_per_buffer: usize,
    full_buffers: usize,
    last_buffer_chunks: usize,
}

impl IntermediatePlan {
    /// Pack `total_chunks` slots of `slot_size` bytes into buffers of about
    /// `target_buffer_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when `slot_size` is zero, `InvalidConfig`
    /// when `target_buffer_size` is zero, and `TooManyChunks` when the chunk
    /// count exceeds [`MAX_TOTAL_CHUNKS`] or the slots cannot be addressed.
    pub fn new(total_chunks: usize, slot_size: usize, target_buffer_size: usize) -> Result<Self> {
        if slot_size == 0 {
            return Err(Error::InvalidArgument("chunk output slot size is zero".to_string()));
        }
        if target_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "target intermediate buffer size is zero".to_string(),
            ));
        }
        if total_chunks > MAX_TOTAL_CHUNKS {
            return Err(Error::TooManyChunks(format!(
                "{total_chunks} chunks exceeds the limit of {MAX_TOTAL_CHUNKS}"
            )));
        }
        if total_chunks.checked_mul(slot_size).is_none() {
            return Err(Error::TooManyChunks(format!(
                "{total_chunks} slots of {slot_size} bytes overflow the address space"
            )));
        }

        let chunks_per_buffer = target_buffer_size.max(slot_size) / slot_size;
        Ok(Self {
            slot_size,
            chunks_per_buffer,
            full_buffers: total_chunks / chunks_per_buffer,
            last_buffer_chunks: total_chunks % chunks_per_buffer,
        })
    }

    /// Bytes reserved per chunk.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Slots in every buffer but the last.
    #[must_use]
    pub fn chunks_per_buffer(&self) -> usize {
        self.chunks_per_buffer
    }

    /// Number of intermediate buffers.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.full_buffers + usize::from(self.last_buffer_chunks > 0)
    }

    /// Slot count of buffer `buffer`, zero past the end.
    #[must_use]
    pub fn buffer_slots(&self, buffer: usize) -> usize {
        if buffer < self.full_buffers {
            self.chunks_per_buffer
        } else if buffer == self.full_buffers {
            self.last_buffer_chunks
        } else {
            0
        }
    }

    /// Slot count of each buffer, in order.
    pub fn buffer_chunks(&self) -> impl ExactSizeIterator<Item = usize> + '_ {
        (0..self.buffer_count()).map(|buffer| self.buffer_slots(buffer))
    }

    /// Byte length of buffer `buffer`.
    #[must_use]
    pub fn buffer_len(&self, buffer: usize) -> usize {
        self.buffer_slots(buffer) * self.slot_size
    }

    /// Total slots across all buffers.
    #[must_use]
    pub fn total_chunks(&self) -> usize {
        self.full_buffers * self.chunks_per_buffer + self.last_buffer_chunks
    }

    /// Bytes across all intermediate buffers.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_chunks() * self.slot_size
    }

    /// Buffer index and byte offset of the slot for global chunk `chunk`.
    #[must_use]
    pub fn slot(&self, chunk: usize) -> (usize, usize) {
        let buffer = chunk / self.chunks_per_buffer;
        let offset = (chunk % self.chunks_per_buffer) * self.slot_size;
        (buffer, offset)
    }
}
