//! Batched transfer engine.
//!
//! One kernel launch runs one execution group per address-table row. What a
//! group does with its range is a [`GroupOp`] strategy: a plain copy, a
//! chunk compression or a chunk decompression. Launches are asynchronous;
//! group failures surface at [`Stream::synchronize`].

use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::codec::ChunkCodec;
use crate::device::{Allocation, Device, DeviceBuffer, Stream};
use crate::table::{AddressTable, TableEntry};
use crate::{Error, Result};

/// Bytes one lane moves per step of the strided copy loop.
pub const LANE_BYTES: usize = 8;

/// Grid geometry of one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Execution groups (one per table row).
    pub groups: u32,
    /// Threads per execution group.
    pub threads_per_group: u32,
}

impl LaunchConfig {
    /// Geometry for `groups` groups on `device`.
    ///
    /// # Errors
    ///
    /// Returns `LaunchConfig` if `groups` exceeds the device's group limit.
    pub fn for_groups(device: &Device, groups: usize) -> Result<Self> {
        let config = device.config();
        match u32::try_from(groups) {
            Ok(n) if n <= config.max_groups => {
                Ok(Self { groups: n, threads_per_group: config.threads_per_group })
            }
            _ => Err(Error::LaunchConfig(format!(
                "{groups} groups exceeds device limit of {}",
                config.max_groups
            ))),
        }
    }
}

/// Work performed by one execution group.
pub trait GroupOp: Send + Sync + 'static {
    /// Operation name for logs and error messages.
    fn name(&self) -> &'static str;

    /// Bytes the group may write at the entry's destination.
    fn output_capacity(&self, entry: &TableEntry) -> u64 {
        entry.len
    }

    /// Whether the table must carry a destination-capacity column.
    fn requires_capacities(&self) -> bool {
        false
    }

    /// Device scratch the op writes during the launch.
    fn scratch(&self) -> Option<&DeviceBuffer> {
        None
    }

    /// Process one range, returning the number of bytes produced at `dst`.
    ///
    /// # Errors
    ///
    /// Any error fails the launch and is reported at synchronization.
    fn run(&self, group: usize, src: &[u8], dst: &mut [u8]) -> Result<u64>;
}

/// Byte copy with a strided lane loop.
#[derive(Debug, Clone, Copy)]
pub struct CopyOp {
    lanes: usize,
}

impl CopyOp {
    /// Copy with `threads_per_group` lanes per group.
    #[must_use]
    pub fn new(threads_per_group: u32) -> Self {
        Self { lanes: threads_per_group.max(1) as usize }
    }
}

impl GroupOp for CopyOp {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn run(&self, _group: usize, src: &[u8], dst: &mut [u8]) -> Result<u64> {
        let stride = self.lanes * LANE_BYTES;
        for (dst_block, src_block) in dst.chunks_mut(stride).zip(src.chunks(stride)) {
            // Lane `l` moves bytes [l * 8, l * 8 + 8) of the block
            for (d, s) in dst_block.chunks_mut(LANE_BYTES).zip(src_block.chunks(LANE_BYTES)) {
                d.copy_from_slice(s);
            }
        }
        Ok(src.len() as u64)
    }
}

/// Chunk compression into fixed-size output slots.
pub struct CompressOp {
    codec: Arc<dyn ChunkCodec>,
    slot_size: usize,
    scratch_per_group: usize,
    temp: DeviceBuffer,
}

impl CompressOp {
    /// Compress `groups` chunks of at most `chunk_size` bytes using `temp`
    /// as codec scratch.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` if `temp` is smaller than the codec's temp
    /// requirement for `groups` chunks.
    pub fn new(
        codec: Arc<dyn ChunkCodec>,
        chunk_size: usize,
        groups: usize,
        temp: DeviceBuffer,
    ) -> Result<Self> {
        let needed = codec.temp_buffer_size(groups, chunk_size);
        if temp.len() < needed {
            return Err(Error::BufferTooSmall { needed, available: temp.len() });
        }
        Ok(Self {
            slot_size: codec.max_output_chunk_size(chunk_size),
            scratch_per_group: codec.temp_bytes_per_chunk(chunk_size),
            codec,
            temp,
        })
    }
}

impl GroupOp for CompressOp {
    fn name(&self) -> &'static str {
        "compress"
    }

    fn output_capacity(&self, _entry: &TableEntry) -> u64 {
        self.slot_size as u64
    }

    fn scratch(&self) -> Option<&DeviceBuffer> {
        Some(&self.temp)
    }

    fn run(&self, group: usize, src: &[u8], dst: &mut [u8]) -> Result<u64> {
        let offset = group * self.scratch_per_group;
        if offset + self.scratch_per_group > self.temp.len() {
            return Err(Error::BufferTooSmall {
                needed: offset + self.scratch_per_group,
                available: self.temp.len(),
            });
        }
        // SAFETY: each group owns scratch [g * per, (g + 1) * per), bounds
        // checked above, and the temp buffer is outside every table range.
        let scratch = unsafe { self.temp.allocation().bytes_mut(offset, self.scratch_per_group) };
        let written = self.codec.compress_chunk(src, dst, scratch)?;
        Ok(written as u64)
    }
}

/// Chunk decompression into exactly-sized destinations.
pub struct DecompressOp {
    codec: Arc<dyn ChunkCodec>,
}

impl DecompressOp {
    /// Decompress with `codec`.
    #[must_use]
    pub fn new(codec: Arc<dyn ChunkCodec>) -> Self {
        Self { codec }
    }
}

impl GroupOp for DecompressOp {
    fn name(&self) -> &'static str {
        "decompress"
    }

    fn output_capacity(&self, entry: &TableEntry) -> u64 {
        entry.capacity
    }

    fn requires_capacities(&self) -> bool {
        true
    }

    fn run(&self, _group: usize, src: &[u8], dst: &mut [u8]) -> Result<u64> {
        let written = self.codec.decompress_chunk(src, dst)?;
        if written != dst.len() {
            return Err(Error::CorruptedData(format!(
                "chunk decompressed to {written} bytes, expected {}",
                dst.len()
            )));
        }
        Ok(written as u64)
    }
}

/// Live allocations a launch touches, keyed by base address.
///
/// Held by the enqueued job so nothing it references is freed early.
struct Residency {
    allocations: BTreeMap<u64, Arc<Allocation>>,
}

impl Residency {
    fn new() -> Self {
        Self { allocations: BTreeMap::new() }
    }

    fn pin(&mut self, device: &Device, address: u64, len: u64) -> Result<()> {
        let alloc = device.resolve(address, len)?;
        self.allocations.entry(alloc.address()).or_insert(alloc);
        Ok(())
    }

    fn locate(&self, address: u64, len: u64) -> Result<(&Allocation, usize)> {
        let alloc = self
            .allocations
            .range(..=address)
            .next_back()
            .map(|(_, alloc)| alloc)
            .filter(|alloc| alloc.contains(address, len))
            .ok_or_else(|| {
                Error::InvalidAddress(format!("{address:#x}+{len} not resident for this launch"))
            })?;
        Ok((alloc.as_ref(), (address - alloc.address()) as usize))
    }
}

#[derive(Clone, Copy)]
struct Interval {
    start: u64,
    end: u64,
    write: bool,
}

/// Reject any overlap between a write range and any other range.
fn check_disjoint(mut intervals: Vec<Interval>) -> Result<()> {
    intervals.retain(|i| i.end > i.start);
    intervals.sort_unstable_by_key(|i| i.start);

    let mut furthest = 0u64;
    let mut furthest_write = 0u64;
    for interval in intervals {
        if interval.start < furthest_write || (interval.write && interval.start < furthest) {
            return Err(Error::InvalidArgument(format!(
                "range {:#x}..{:#x} overlaps a destination range",
                interval.start, interval.end
            )));
        }
        furthest = furthest.max(interval.end);
        if interval.write {
            furthest_write = furthest_write.max(interval.end);
        }
    }
    Ok(())
}

/// Dispatches table-driven kernels on one stream.
#[derive(Debug)]
pub struct BatchedTransferEngine<'s> {
    stream: &'s Stream,
}

impl<'s> BatchedTransferEngine<'s> {
    /// Engine enqueuing on `stream`.
    #[must_use]
    pub fn new(stream: &'s Stream) -> Self {
        Self { stream }
    }

    /// Launch one kernel applying `op` to every row of `table`.
    ///
    /// Validates the geometry and every range, stages the table with one
    /// host-to-device transfer, and enqueues the kernel. When `sizes_out` is
    /// given, group `g` writes its produced byte count as a little-endian
    /// `u64` at offset `8 * g`. An empty table enqueues nothing.
    ///
    /// # Errors
    ///
    /// Returns `LaunchConfig` for too many groups, `InvalidAddress` for
    /// ranges outside live allocations, `InvalidArgument` for overlapping
    /// destinations or a missing capacity column, and `OutOfMemory` if the
    /// table cannot be staged. Group failures are reported later, by
    /// [`Stream::synchronize`], as `DeviceExecution`.
    pub fn launch<O: GroupOp>(
        &self,
        table: &AddressTable,
        op: O,
        sizes_out: Option<&DeviceBuffer>,
    ) -> Result<()> {
        let groups = table.len();
        if groups == 0 {
            debug!(op = op.name(), "empty table, nothing to launch");
            return Ok(());
        }

        let device = self.stream.device();
        let config = LaunchConfig::for_groups(device, groups)?;
        if op.requires_capacities() && !table.is_bounded() {
            return Err(Error::InvalidArgument(format!(
                "{} needs a destination-capacity column",
                op.name()
            )));
        }

        let mut residency = Residency::new();
        let mut intervals = Vec::with_capacity(groups * 2 + 2);
        for entry in table.entries() {
            let capacity = op.output_capacity(&entry);
            residency.pin(device, entry.src, entry.len)?;
            residency.pin(device, entry.dst, capacity)?;
            intervals.push(Interval { start: entry.src, end: entry.src + entry.len, write: false });
            intervals.push(Interval { start: entry.dst, end: entry.dst + capacity, write: true });
        }

        let sizes_len = (groups * 8) as u64;
        if let Some(sizes) = sizes_out {
            if sizes.len() < groups * 8 {
                return Err(Error::BufferTooSmall { needed: groups * 8, available: sizes.len() });
            }
            residency.pin(device, sizes.address(), sizes_len)?;
            intervals.push(Interval {
                start: sizes.address(),
                end: sizes.address() + sizes_len,
                write: true,
            });
        }
        if let Some(scratch) = op.scratch() {
            intervals.push(Interval {
                start: scratch.address(),
                end: scratch.address() + scratch.len() as u64,
                write: true,
            });
        }
        check_disjoint(intervals)?;

        let staged = table.stage(self.stream)?;
        let sizes_address = sizes_out.map(DeviceBuffer::address);

        debug!(
            op = op.name(),
            groups = config.groups,
            threads_per_group = config.threads_per_group,
            table_bytes = staged.layout().byte_len(),
            "kernel launch"
        );
        device.record_launch();

        self.stream.enqueue("kernel", move || {
            let layout = staged.layout();
            let table_alloc = staged.buffer().allocation();
            // SAFETY: the staged table is read-only once its transfer completed
            let entries = layout.decode(unsafe { table_alloc.bytes(0, layout.byte_len()) })?;

            let produced = entries
                .par_iter()
                .enumerate()
                .map(|(group, entry)| {
                    run_group(&op, &residency, group, entry).map_err(|e| {
                        Error::DeviceExecution(format!("{} group {group}: {e}", op.name()))
                    })
                })
                .collect::<Result<Vec<u64>>>()?;

            if let Some(address) = sizes_address {
                let (alloc, offset) = residency.locate(address, sizes_len)?;
                // SAFETY: the sizes range is resident and disjoint from every other range
                let out = unsafe { alloc.bytes_mut(offset, sizes_len as usize) };
                for (slot, size) in out.chunks_exact_mut(8).zip(&produced) {
                    slot.copy_from_slice(&size.to_le_bytes());
                }
            }
            Ok(())
        })
    }
}

fn run_group<O: GroupOp>(
    op: &O,
    residency: &Residency,
    group: usize,
    entry: &TableEntry,
) -> Result<u64> {
    let capacity = op.output_capacity(entry);
    let (src_alloc, src_offset) = residency.locate(entry.src, entry.len)?;
    let (dst_alloc, dst_offset) = residency.locate(entry.dst, capacity)?;
    // SAFETY: ranges are resident and were checked pairwise: no write range
    // overlaps any other range of the launch.
    let (src, dst) = unsafe {
        (
            src_alloc.bytes(src_offset, entry.len as usize),
            dst_alloc.bytes_mut(dst_offset, capacity as usize),
        )
    };
    op.run(group, src, dst)
}
