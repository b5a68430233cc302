//! Batched chunked compression and decompression.
//!
//! Compression of N buffers costs two kernel launches, two table transfers
//! and one size readback, independent of the chunk count:
//!
//! 1. Plan chunks and intermediate slots.
//! 2. Launch [`CompressOp`] over all chunks, recording each compressed size.
//! 3. Read the sizes back (the only synchronization).
//! 4. Stitch chunks behind per-input size headers with a batched copy.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::codec::{ChunkCodec, Lz4Codec};
use crate::config::BatchConfig;
use crate::device::{DeviceBuffer, Region, Stream};
use crate::engine::{BatchedTransferEngine, CompressOp, CopyOp, DecompressOp};
use crate::format::{header_len, validate_sizes, METADATA_BYTES_PER_CHUNK};
use crate::plan::{validate_chunk_size, ChunkPlan, IntermediatePlan};
use crate::stitch::ResultStitcher;
use crate::table::AddressTable;
use crate::{Error, Result};

/// Chunk and slot plan for one compression batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressionPlan {
    /// Codec name.
    pub codec: &'static str,
    /// Chunking of the inputs.
    pub chunks: ChunkPlan,
    /// Packing of chunk output slots into intermediate buffers.
    pub slots: IntermediatePlan,
    /// Codec scratch bytes for the whole launch.
    pub temp_bytes: usize,
}

impl CompressionPlan {
    /// Device bytes the batch holds at its peak, excluding inputs and outputs.
    #[must_use]
    pub fn working_set_bytes(&self) -> usize {
        let total = self.chunks.total_chunks();
        self.slots.total_bytes() + self.temp_bytes + total * METADATA_BYTES_PER_CHUNK
    }
}

/// Compresses many device buffers with one batched codec launch.
#[derive(Clone)]
pub struct BatchedCompressor {
    codec: Arc<dyn ChunkCodec>,
    chunk_size: usize,
    target_intermediate_buffer_size: usize,
}

/// LZ4 flavour of [`BatchedCompressor`].
pub type BatchedLz4Compressor = BatchedCompressor;

impl BatchedCompressor {
    /// Create a compressor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a chunk size outside
    /// [`MIN_CHUNK_SIZE`](crate::MIN_CHUNK_SIZE)..=[`MAX_CHUNK_SIZE`](crate::MAX_CHUNK_SIZE)
    /// or a zero intermediate target. Nothing is allocated.
    pub fn new(
        codec: Arc<dyn ChunkCodec>,
        chunk_size: usize,
        target_intermediate_buffer_size: usize,
    ) -> Result<Self> {
        validate_chunk_size(chunk_size)?;
        if target_intermediate_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "target intermediate buffer size must be non-zero".to_string(),
            ));
        }
        Ok(Self { codec, chunk_size, target_intermediate_buffer_size })
    }

    /// LZ4 compressor.
    ///
    /// # Errors
    ///
    /// Same as [`BatchedCompressor::new`].
    pub fn lz4(chunk_size: usize, target_intermediate_buffer_size: usize) -> Result<Self> {
        Self::new(Arc::new(Lz4Codec), chunk_size, target_intermediate_buffer_size)
    }

    /// LZ4 compressor from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is invalid.
    pub fn from_config(config: &BatchConfig) -> Result<Self> {
        config.validate()?;
        Self::lz4(config.chunk_size, config.target_intermediate_buffer_size)
    }

    /// Configured chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Configured intermediate buffer target.
    #[must_use]
    pub fn target_intermediate_buffer_size(&self) -> usize {
        self.target_intermediate_buffer_size
    }

    /// Codec used per chunk.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn ChunkCodec> {
        &self.codec
    }

    /// Plan a batch of inputs with the given lengths.
    ///
    /// # Errors
    ///
    /// Returns `TooManyChunks` if the batch cannot be indexed.
    pub fn plan(&self, lengths: &[usize]) -> Result<CompressionPlan> {
        let chunks = ChunkPlan::new(lengths, self.chunk_size)?;
        let slots = IntermediatePlan::new(
            chunks.total_chunks(),
            self.codec.max_output_chunk_size(self.chunk_size),
            self.target_intermediate_buffer_size,
        )?;
        let temp_bytes = self.codec.temp_buffer_size(chunks.total_chunks(), self.chunk_size);
        Ok(CompressionPlan { codec: self.codec.name(), chunks, slots, temp_bytes })
    }

    /// Compress every input, consuming them.
    ///
    /// Each output is `[chunk_count x u64 LE size][compressed chunks]`. The
    /// call synchronizes `stream` once to read the compressed sizes; the
    /// stitch launch is left in flight. Inputs are released right after the
    /// size readback.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if a working buffer cannot be allocated (every
    /// partial allocation is released), `LaunchConfig` if the chunk count
    /// exceeds the device group limit, and `DeviceExecution` if the
    /// compression launch fails.
    pub fn compress(&self, inputs: Vec<DeviceBuffer>, stream: &Stream) -> Result<Vec<DeviceBuffer>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let device = stream.device();
        let lengths: Vec<usize> = inputs.iter().map(DeviceBuffer::len).collect();
        let plan = self.plan(&lengths)?;
        let total = plan.chunks.total_chunks();
        if total == 0 {
            return inputs.iter().map(|_| device.allocate(0)).collect();
        }

        debug!(
            codec = plan.codec,
            inputs = inputs.len(),
            chunks = total,
            intermediates = plan.slots.buffer_count(),
            slot_size = plan.slots.slot_size(),
            "batched compress"
        );

        let intermediates = (0..plan.slots.buffer_count())
            .map(|b| device.allocate(plan.slots.buffer_len(b)))
            .collect::<Result<Vec<_>>>()?;
        let sizes_dev = device.allocate(header_len(total))?;
        let temp = device.allocate(plan.temp_bytes)?;

        let table = AddressTable::for_compression(&inputs, &plan.chunks, &intermediates, &plan.slots)?;
        let op = CompressOp::new(Arc::clone(&self.codec), self.chunk_size, total, temp)?;
        BatchedTransferEngine::new(stream).launch(&table, op, Some(&sizes_dev))?;

        let sizes = stream.copy_to_host(&sizes_dev)?.read_u64s(Region::new(0, header_len(total)))?;
        drop(inputs);

        let outputs = ResultStitcher::new(stream).stitch(
            &plan.chunks,
            &plan.slots,
            &intermediates,
            &sizes_dev,
            &sizes,
        )?;

        let compressed: u64 = sizes.iter().sum();
        info!(
            chunks = total,
            input_bytes = lengths.iter().sum::<usize>(),
            compressed_bytes = compressed,
            "batched compress enqueued"
        );
        Ok(outputs)
    }
}

impl std::fmt::Debug for BatchedCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedCompressor")
            .field("codec", &self.codec.name())
            .field("chunk_size", &self.chunk_size)
            .field("target_intermediate_buffer_size", &self.target_intermediate_buffer_size)
            .finish()
    }
}

/// Restores outputs of [`BatchedCompressor`] with one batched codec launch.
#[derive(Clone)]
pub struct BatchedDecompressor {
    codec: Arc<dyn ChunkCodec>,
    chunk_size: usize,
}

impl BatchedDecompressor {
    /// Create a decompressor for outputs made with `chunk_size`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an out-of-range chunk size.
    pub fn new(codec: Arc<dyn ChunkCodec>, chunk_size: usize) -> Result<Self> {
        validate_chunk_size(chunk_size)?;
        Ok(Self { codec, chunk_size })
    }

    /// LZ4 decompressor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an out-of-range chunk size.
    pub fn lz4(chunk_size: usize) -> Result<Self> {
        Self::new(Arc::new(Lz4Codec), chunk_size)
    }

    /// Decompressor matching `compressor`.
    #[must_use]
    pub fn for_compressor(compressor: &BatchedCompressor) -> Self {
        Self { codec: Arc::clone(&compressor.codec), chunk_size: compressor.chunk_size }
    }

    /// Decompress every input, consuming them.
    ///
    /// `original_lengths[i]` is the uncompressed length of `inputs[i]`. All
    /// headers are gathered with one batched copy and read back once; the
    /// decompression launch is left in flight.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for mismatched counts, `CorruptedData` if a
    /// header is truncated or inconsistent with its buffer, and
    /// `DeviceExecution` at synchronization if a chunk fails to decompress
    /// to its expected size.
    pub fn decompress(
        &self,
        inputs: Vec<DeviceBuffer>,
        original_lengths: &[usize],
        stream: &Stream,
    ) -> Result<Vec<DeviceBuffer>> {
        if inputs.len() != original_lengths.len() {
            return Err(Error::InvalidArgument(format!(
                "{} inputs with {} original lengths",
                inputs.len(),
                original_lengths.len()
            )));
        }
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let device = stream.device();
        let plan = ChunkPlan::new(original_lengths, self.chunk_size)?;
        for (span, input) in plan.spans().iter().zip(&inputs) {
            if input.len() < header_len(span.chunk_count) {
                return Err(Error::CorruptedData(format!(
                    "input {} has {} bytes, header alone needs {}",
                    span.input,
                    input.len(),
                    header_len(span.chunk_count)
                )));
            }
        }

        let total = plan.total_chunks();
        let sizes = if total == 0 {
            Vec::new()
        } else {
            let headers = device.allocate(header_len(total))?;
            let mut gather = AddressTable::with_capacity(plan.input_count());
            for (span, input) in plan.spans().iter().zip(&inputs) {
                if span.chunk_count > 0 {
                    gather.push(
                        input.address(),
                        headers.address_at(header_len(span.first_chunk)),
                        header_len(span.chunk_count) as u64,
                    );
                }
            }
            let lanes = device.config().threads_per_group;
            BatchedTransferEngine::new(stream).launch(&gather, CopyOp::new(lanes), None)?;
            stream.copy_to_host(&headers)?.read_u64s(Region::new(0, header_len(total)))?
        };

        for (span, input) in plan.spans().iter().zip(&inputs) {
            let own = &sizes[span.first_chunk..span.first_chunk + span.chunk_count];
            validate_sizes(own, input.len() - header_len(span.chunk_count)).map_err(|e| {
                Error::CorruptedData(format!("input {}: {e}", span.input))
            })?;
        }

        let outputs = original_lengths
            .iter()
            .map(|&len| device.allocate(len))
            .collect::<Result<Vec<_>>>()?;

        let mut cursors: Vec<usize> =
            plan.spans().iter().map(|span| header_len(span.chunk_count)).collect();
        let mut table = AddressTable::bounded(total);
        for chunk in plan.chunks() {
            let size = sizes[chunk.index];
            let cursor = &mut cursors[chunk.input];
            table.push_bounded(
                inputs[chunk.input].address_at(*cursor),
                outputs[chunk.input].address_at(chunk.offset),
                size,
                chunk.len as u64,
            );
            *cursor += size as usize;
        }

        debug!(
            codec = self.codec.name(),
            inputs = inputs.len(),
            chunks = total,
            "batched decompress"
        );
        BatchedTransferEngine::new(stream).launch(&table, DecompressOp::new(Arc::clone(&self.codec)), None)?;
        Ok(outputs)
    }
}

impl std::fmt::Debug for BatchedDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedDecompressor")
            .field("codec", &self.codec.name())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}
