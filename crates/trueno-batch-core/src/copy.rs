//! Batched multi-buffer copy.

use crate::device::{DeviceBuffer, Stream};
use crate::engine::{BatchedTransferEngine, CopyOp};
use crate::table::AddressTable;
use crate::Result;

/// Enqueue a copy of every `sources[i]` into `destinations[i]` as one kernel
/// launch.
///
/// Only `sources[i].len()` bytes are written; the rest of a larger
/// destination is left untouched. Returns once the work is enqueued.
///
/// # Errors
///
/// Returns `InvalidArgument` if the slices differ in length, a destination
/// is shorter than its source, or destinations overlap each other or any
/// source. Returns `LaunchConfig` if the batch exceeds the device group
/// limit.
pub fn batched_copy_async(
    destinations: &[DeviceBuffer],
    sources: &[DeviceBuffer],
    stream: &Stream,
) -> Result<()> {
    let table = AddressTable::for_copy(destinations, sources)?;
    multi_buffer_copy_async(&table, stream)
}

/// Enqueue a table-driven copy: row `i` copies `sizes[i]` bytes from
/// `sources[i]` to `destinations[i]`.
///
/// # Errors
///
/// Returns `InvalidAddress` for rows outside live allocations and
/// `InvalidArgument` for overlapping destinations.
pub fn multi_buffer_copy_async(table: &AddressTable, stream: &Stream) -> Result<()> {
    let lanes = stream.device().config().threads_per_group;
    BatchedTransferEngine::new(stream).launch(table, CopyOp::new(lanes), None)
}
