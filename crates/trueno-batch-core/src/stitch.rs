//! Reassembly of per-chunk compressed outputs.
//!
//! After the compression launch every chunk sits in its own fixed-size slot.
//! The stitcher packs each input's chunks behind a size header in one
//! contiguous output buffer, using a second batched copy.

use tracing::debug;

use crate::device::{DeviceBuffer, Stream};
use crate::engine::{BatchedTransferEngine, CopyOp};
use crate::format::METADATA_BYTES_PER_CHUNK;
use crate::plan::{ChunkPlan, IntermediatePlan};
use crate::table::AddressTable;
use crate::{Error, Result};

/// Packs scattered chunk outputs into per-input compressed buffers.
#[derive(Debug)]
pub struct ResultStitcher<'s> {
    stream: &'s Stream,
}

impl<'s> ResultStitcher<'s> {
    /// Stitcher enqueuing on `stream`.
    #[must_use]
    pub fn new(stream: &'s Stream) -> Self {
        Self { stream }
    }

    /// Output length per input: `8 * chunk_count + sum(chunk sizes)`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` unless `sizes` holds one entry per planned
    /// chunk.
    pub fn output_sizes(plan: &ChunkPlan, sizes: &[u64]) -> Result<Vec<usize>> {
        check_size_count(plan, sizes)?;
        Ok(plan
            .spans()
            .iter()
            .map(|span| {
                let payload: u64 =
                    sizes[span.first_chunk..span.first_chunk + span.chunk_count].iter().sum();
                span.chunk_count * METADATA_BYTES_PER_CHUNK + payload as usize
            })
            .collect())
    }

    /// Allocate the outputs and enqueue the stitch launch.
    ///
    /// `sizes_dev` holds the device-resident copy of `sizes` and supplies the
    /// headers. The launch has `inputs + chunks` rows: one header row per
    /// input with chunks, then one row per chunk.
    ///
    /// # Errors
    ///
    /// Returns `DeviceExecution` if a reported size exceeds its slot,
    /// `InvalidArgument` if `sizes` does not match the plan, and
    /// `OutOfMemory` if the outputs cannot be allocated.
    pub fn stitch(
        &self,
        plan: &ChunkPlan,
        slots: &IntermediatePlan,
        intermediates: &[DeviceBuffer],
        sizes_dev: &DeviceBuffer,
        sizes: &[u64],
    ) -> Result<Vec<DeviceBuffer>> {
        check_size_count(plan, sizes)?;
        let slot_size = slots.slot_size() as u64;
        if let Some((chunk, &size)) = sizes.iter().enumerate().find(|&(_, &s)| s > slot_size) {
            return Err(Error::DeviceExecution(format!(
                "chunk {chunk} reported {size} compressed bytes, slot holds {slot_size}"
            )));
        }

        let device = self.stream.device();
        let outputs = Self::output_sizes(plan, sizes)?
            .into_iter()
            .map(|len| device.allocate(len))
            .collect::<Result<Vec<_>>>()?;

        let mut table = AddressTable::with_capacity(plan.input_count() + plan.total_chunks());
        for (span, output) in plan.spans().iter().zip(&outputs) {
            if span.chunk_count == 0 {
                continue;
            }
            let header_len = span.chunk_count * METADATA_BYTES_PER_CHUNK;
            table.push(
                sizes_dev.address_at(span.first_chunk * METADATA_BYTES_PER_CHUNK),
                output.address(),
                header_len as u64,
            );

            let mut cursor = header_len;
            for chunk in span.first_chunk..span.first_chunk + span.chunk_count {
                let (buffer, offset) = slots.slot(chunk);
                let size = sizes[chunk];
                if size > 0 {
                    table.push(
                        intermediates[buffer].address_at(offset),
                        output.address_at(cursor),
                        size,
                    );
                }
                cursor += size as usize;
            }
        }

        debug!(
            outputs = outputs.len(),
            rows = table.len(),
            "stitching compressed chunks"
        );
        let lanes = device.config().threads_per_group;
        BatchedTransferEngine::new(self.stream).launch(&table, CopyOp::new(lanes), None)?;
        Ok(outputs)
    }
}

fn check_size_count(plan: &ChunkPlan, sizes: &[u64]) -> Result<()> {
    if sizes.len() == plan.total_chunks() {
        return Ok(());
    }
    Err(Error::InvalidArgument(format!(
        "{} sizes for {} chunks",
        sizes.len(),
        plan.total_chunks()
    )))
}
