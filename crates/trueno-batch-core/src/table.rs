//! Address tables: index-aligned source, destination and size columns.
//!
//! A table is built on the host in plan order, staged into one contiguous
//! device allocation with a single host-to-device transfer, and decoded by
//! the kernel through the same [`TableLayout`].

use tracing::trace;

use crate::device::{decode_u64s, DeviceBuffer, Region, Stream};
use crate::plan::{ChunkPlan, IntermediatePlan};
use crate::{Error, Result};

const WORD: usize = std::mem::size_of::<u64>();

/// One column of an address table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Source device addresses.
    Sources,
    /// Destination device addresses.
    Destinations,
    /// Source byte counts.
    Sizes,
    /// Destination capacities (bounded tables only).
    Capacities,
}

impl Column {
    const ALL: [Column; 4] = [Self::Sources, Self::Destinations, Self::Sizes, Self::Capacities];

    fn index(self) -> usize {
        match self {
            Self::Sources => 0,
            Self::Destinations => 1,
            Self::Sizes => 2,
            Self::Capacities => 3,
        }
    }
}

/// Column placement inside a staged table: column-major, `u64` LE words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    entries: usize,
    columns: usize,
}

impl TableLayout {
    /// Layout for `entries` rows of `columns` columns (3 or 4).
    #[must_use]
    pub const fn new(entries: usize, columns: usize) -> Self {
        Self { entries, columns }
    }

    /// Number of rows.
    #[must_use]
    pub const fn entries(&self) -> usize {
        self.entries
    }

    /// Columns present in this layout, in storage order.
    pub fn columns(&self) -> impl Iterator<Item = Column> {
        Column::ALL.into_iter().take(self.columns)
    }

    /// Whether `column` is stored.
    #[must_use]
    pub fn has(&self, column: Column) -> bool {
        column.index() < self.columns
    }

    /// Byte region holding `column`.
    #[must_use]
    pub fn region(&self, column: Column) -> Region {
        let len = self.entries * WORD;
        Region::new(column.index() * len, len)
    }

    /// Total staged size in bytes.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.entries * self.columns * WORD
    }

    /// Decode the rows of a staged table.
    pub(crate) fn decode(&self, bytes: &[u8]) -> Result<Vec<TableEntry>> {
        if bytes.len() < self.byte_len() {
            return Err(Error::BufferTooSmall { needed: self.byte_len(), available: bytes.len() });
        }
        let column = |c: Column| {
            let r = self.region(c);
            decode_u64s(&bytes[r.offset..r.end()])
        };
        let sources = column(Column::Sources);
        let destinations = column(Column::Destinations);
        let sizes = column(Column::Sizes);
        let capacities = if self.has(Column::Capacities) {
            column(Column::Capacities)
        } else {
            sizes.clone()
        };

        Ok((0..self.entries)
            .map(|i| TableEntry {
                src: sources[i],
                dst: destinations[i],
                len: sizes[i],
                capacity: capacities[i],
            })
            .collect())
    }
}

/// One row of an address table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    /// Source device address.
    pub src: u64,
    /// Destination device address.
    pub dst: u64,
    /// Bytes to read from `src`.
    pub len: u64,
    /// Bytes available at `dst`; equals `len` in three-column tables.
    pub capacity: u64,
}

/// Host-side builder of the parallel address arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressTable {
    sources: Vec<u64>,
    destinations: Vec<u64>,
    sizes: Vec<u64>,
    capacities: Vec<u64>,
    bounded: bool,
}

impl AddressTable {
    /// Empty three-column table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty three-column table with room for `entries` rows.
    #[must_use]
    pub fn with_capacity(entries: usize) -> Self {
        Self {
            sources: Vec::with_capacity(entries),
            destinations: Vec::with_capacity(entries),
            sizes: Vec::with_capacity(entries),
            capacities: Vec::with_capacity(entries),
            bounded: false,
        }
    }

    /// Empty four-column table that also stages destination capacities.
    #[must_use]
    pub fn bounded(entries: usize) -> Self {
        Self { bounded: true, ..Self::with_capacity(entries) }
    }

    /// Append a row whose destination holds exactly `len` bytes.
    pub fn push(&mut self, src: u64, dst: u64, len: u64) {
        self.push_bounded(src, dst, len, len);
    }

    /// Append a row with an explicit destination capacity.
    pub fn push_bounded(&mut self, src: u64, dst: u64, len: u64, capacity: u64) {
        self.sources.push(src);
        self.destinations.push(dst);
        self.sizes.push(len);
        self.capacities.push(capacity);
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// True for four-column tables.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.bounded
    }

    /// Values of `column`, or `None` if this table does not stage it.
    #[must_use]
    pub fn column(&self, column: Column) -> Option<&[u64]> {
        match column {
            Column::Sources => Some(&self.sources),
            Column::Destinations => Some(&self.destinations),
            Column::Sizes => Some(&self.sizes),
            Column::Capacities => self.bounded.then_some(self.capacities.as_slice()),
        }
    }

    /// Row `index`.
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<TableEntry> {
        Some(TableEntry {
            src: *self.sources.get(index)?,
            dst: self.destinations[index],
            len: self.sizes[index],
            capacity: self.capacities[index],
        })
    }

    /// All rows in order.
    pub fn entries(&self) -> impl Iterator<Item = TableEntry> + '_ {
        (0..self.len()).filter_map(|i| self.entry(i))
    }

    /// Staged layout of this table.
    #[must_use]
    pub fn layout(&self) -> TableLayout {
        TableLayout::new(self.len(), if self.bounded { 4 } else { 3 })
    }

    /// Table copying each source into the destination at the same index.
    ///
    /// Zero-length sources contribute no row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the slices differ in length or a
    /// destination is shorter than its source.
    pub fn for_copy(destinations: &[DeviceBuffer], sources: &[DeviceBuffer]) -> Result<Self> {
        if destinations.len() != sources.len() {
            return Err(Error::InvalidArgument(format!(
                "{} destinations for {} sources",
                destinations.len(),
                sources.len()
            )));
        }

        let mut table = Self::with_capacity(sources.len());
        for (i, (dst, src)) in destinations.iter().zip(sources).enumerate() {
            if dst.len() < src.len() {
                return Err(Error::InvalidArgument(format!(
                    "destination {i} holds {} bytes, source has {}",
                    dst.len(),
                    src.len()
                )));
            }
            if !src.is_empty() {
                table.push(src.address(), dst.address(), src.len() as u64);
            }
        }
        Ok(table)
    }

    /// Table compressing every planned chunk into its intermediate slot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the buffers do not match the plans.
    pub fn for_compression(
        inputs: &[DeviceBuffer],
        chunks: &ChunkPlan,
        intermediates: &[DeviceBuffer],
        slots: &IntermediatePlan,
    ) -> Result<Self> {
        if inputs.len() != chunks.input_count() || intermediates.len() != slots.buffer_count() {
            return Err(Error::InvalidArgument(format!(
                "plan covers {} inputs and {} intermediates, got {} and {}",
                chunks.input_count(),
                slots.buffer_count(),
                inputs.len(),
                intermediates.len()
            )));
        }

        let mut table = Self::with_capacity(chunks.total_chunks());
        for chunk in chunks.chunks() {
            let (buffer, offset) = slots.slot(chunk.index);
            table.push(
                inputs[chunk.input].address_at(chunk.offset),
                intermediates[buffer].address_at(offset),
                chunk.len as u64,
            );
        }
        Ok(table)
    }

    /// Stage the table into device memory with one pinned buffer and one
    /// host-to-device transfer.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the device allocation fails.
    pub fn stage(&self, stream: &Stream) -> Result<StagedTable> {
        let layout = self.layout();
        let device = stream.device();

        let mut host = device.allocate_host(layout.byte_len())?;
        for column in layout.columns() {
            if let Some(values) = self.column(column) {
                host.write_u64s(layout.region(column), values)?;
            }
        }

        let buffer = device.allocate(layout.byte_len())?;
        stream.copy_to_device(host, &buffer, 0)?;
        trace!(entries = layout.entries(), bytes = layout.byte_len(), "staged address table");
        Ok(StagedTable { buffer, layout })
    }
}

/// An address table resident in device memory.
#[derive(Debug)]
pub struct StagedTable {
    buffer: DeviceBuffer,
    layout: TableLayout,
}

impl StagedTable {
    /// Device buffer holding the columns.
    #[must_use]
    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    /// Column layout.
    #[must_use]
    pub fn layout(&self) -> TableLayout {
        self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, HostBuffer};

    #[test]
    fn test_layout_regions_are_column_major() {
        let layout = TableLayout::new(5, 3);
        assert_eq!(layout.region(Column::Sources), Region::new(0, 40));
        assert_eq!(layout.region(Column::Destinations), Region::new(40, 40));
        assert_eq!(layout.region(Column::Sizes), Region::new(80, 40));
        assert_eq!(layout.byte_len(), 120);
        assert!(!layout.has(Column::Capacities));
        assert_eq!(layout.columns().count(), 3);
    }

    #[test]
    fn test_bounded_layout_has_four_columns() {
        let mut table = AddressTable::bounded(1);
        table.push_bounded(1, 2, 3, 4);
        let layout = table.layout();
        assert!(layout.has(Column::Capacities));
        assert_eq!(layout.byte_len(), 32);
        assert_eq!(table.column(Column::Capacities), Some(&[4u64][..]));
    }

    #[test]
    fn test_unbounded_table_hides_capacities() {
        let mut table = AddressTable::new();
        table.push(1, 2, 3);
        assert_eq!(table.column(Column::Capacities), None);
        assert_eq!(table.entry(0).unwrap().capacity, 3);
        assert_eq!(table.entry(1), None);
    }

    #[test]
    fn test_decode_matches_built_table() {
        let mut table = AddressTable::bounded(2);
        table.push_bounded(0x1000, 0x2000, 10, 64);
        table.push_bounded(0x3000, 0x4000, 20, 128);

        let layout = table.layout();
        let mut host = HostBuffer::zeroed(layout.byte_len());
        for column in layout.columns() {
            host.write_u64s(layout.region(column), table.column(column).unwrap()).unwrap();
        }

        let decoded = layout.decode(host.as_slice()).unwrap();
        assert_eq!(decoded, table.entries().collect::<Vec<_>>());
    }

    #[test]
    fn test_decode_short_buffer() {
        let layout = TableLayout::new(2, 3);
        assert!(layout.decode(&[0u8; 40]).is_err());
    }

    #[test]
    fn test_for_copy_validates() {
        let device = Device::default();
        let src = vec![device.allocate(10).unwrap(), device.allocate(0).unwrap()];
        let dst = vec![device.allocate(10).unwrap()];
        assert!(matches!(AddressTable::for_copy(&dst, &src), Err(Error::InvalidArgument(_))));

        let dst = vec![device.allocate(9).unwrap(), device.allocate(0).unwrap()];
        assert!(AddressTable::for_copy(&dst, &src).is_err());

        let dst = vec![device.allocate(12).unwrap(), device.allocate(0).unwrap()];
        let table = AddressTable::for_copy(&dst, &src).unwrap();
        // Zero-length pair is skipped
        assert_eq!(table.len(), 1);
        let entry = table.entry(0).unwrap();
        assert_eq!((entry.src, entry.dst, entry.len), (src[0].address(), dst[0].address(), 10));
    }

    #[test]
    fn test_for_compression_targets_slots() {
        let device = Device::default();
        let chunk_size = crate::plan::MIN_CHUNK_SIZE;
        let inputs = vec![device.allocate(chunk_size * 2 + 1).unwrap()];
        let chunks = ChunkPlan::new(&[chunk_size * 2 + 1], chunk_size).unwrap();
        let slots = IntermediatePlan::new(3, 100, 200).unwrap();
        let intermediates: Vec<_> =
            (0..slots.buffer_count()).map(|b| device.allocate(slots.buffer_len(b)).unwrap()).collect();

        let table = AddressTable::for_compression(&inputs, &chunks, &intermediates, &slots).unwrap();
        assert_eq!(table.len(), 3);
        let last = table.entry(2).unwrap();
        assert_eq!(last.src, inputs[0].address_at(chunk_size * 2));
        assert_eq!(last.dst, intermediates[1].address());
        assert_eq!(last.len, 1);
        assert_eq!(table.entry(1).unwrap().dst, intermediates[0].address_at(100));
    }

    #[test]
    fn test_stage_uses_one_transfer() {
        let device = Device::default();
        let stream = device.create_stream().unwrap();
        let mut table = AddressTable::new();
        table.push(1, 2, 3);
        table.push(4, 5, 6);

        let before = device.stats();
        let staged = table.stage(&stream).unwrap();
        let after = device.stats();
        assert_eq!(after.h2d_transfers - before.h2d_transfers, 1);
        assert_eq!(after.allocations - before.allocations, 1);

        let bytes = stream.copy_to_host(staged.buffer()).unwrap();
        let decoded = staged.layout().decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, table.entries().collect::<Vec<_>>());
    }
}
