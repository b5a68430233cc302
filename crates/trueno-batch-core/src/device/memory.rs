//! Device allocations, pinned host buffers and byte-region views.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use super::DeviceInner;
use crate::{Error, Result};

/// Byte range inside one owned allocation.
///
/// Lets a single staging buffer carry several logical arrays while every
/// access stays bounds-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Offset from the start of the allocation.
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
}

impl Region {
    /// Create a region.
    #[must_use]
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// One past the last byte.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    fn check(&self, available: usize) -> Result<()> {
        if self.end() > available {
            return Err(Error::BufferTooSmall { needed: self.end(), available });
        }
        Ok(())
    }
}

/// Backing storage of a device allocation.
///
/// Freed, and removed from the device registry, when the last reference
/// drops. Enqueued work holds references so frees are stream-ordered.
pub(crate) struct Allocation {
    ptr: NonNull<u8>,
    capacity: usize,
    len: usize,
    device: Arc<DeviceInner>,
}

// SAFETY: the allocation is plain bytes. Mutation only happens on stream
// workers holding the device execution lock, and kernel groups write disjoint
// ranges validated at launch.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Allocation {
    pub(crate) fn new(device: Arc<DeviceInner>, len: usize) -> Arc<Self> {
        // Zero-length buffers still get a unique address.
        let capacity = len.max(1);
        let raw = Box::into_raw(vec![0u8; capacity].into_boxed_slice()).cast::<u8>();
        // SAFETY: Box::into_raw never returns null
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        Arc::new(Self { ptr, capacity, len, device })
    }

    pub(crate) fn address(&self) -> u64 {
        self.ptr.as_ptr() as usize as u64
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Whether `[addr, addr + len)` lies inside this allocation.
    pub(crate) fn contains(&self, addr: u64, len: u64) -> bool {
        let base = self.address();
        addr >= base && (addr - base).checked_add(len).is_some_and(|end| end <= self.len as u64)
    }

    /// # Safety
    ///
    /// `offset + len` must not exceed `self.len()` and no writer may alias the range.
    pub(crate) unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len)
    }

    /// # Safety
    ///
    /// `offset + len` must not exceed `self.len()` and the range must not be
    /// accessed by anyone else for the lifetime of the returned slice.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len)
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.device.release(self.address(), self.len);
        // SAFETY: ptr and capacity come from Box::into_raw in `new`
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.capacity,
            )));
        }
    }
}

/// Owned device memory, addressed by a 64-bit device address.
///
/// Dropping the handle releases the memory once no enqueued work still
/// references it.
pub struct DeviceBuffer {
    alloc: Arc<Allocation>,
}

impl DeviceBuffer {
    pub(crate) fn from_allocation(alloc: Arc<Allocation>) -> Self {
        Self { alloc }
    }

    /// Device address of the first byte.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.alloc.address()
    }

    /// Device address `offset` bytes into the buffer.
    #[must_use]
    pub fn address_at(&self, offset: usize) -> u64 {
        self.address() + offset as u64
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alloc.len()
    }

    /// True for zero-length buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn allocation(&self) -> &Arc<Allocation> {
        &self.alloc
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len())
            .finish()
    }
}

/// Pinned host memory used for staging transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBuffer {
    data: Vec<u8>,
}

impl HostBuffer {
    pub(crate) fn zeroed(len: usize) -> Self {
        Self { data: vec![0; len] }
    }

    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for zero-length buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Contents as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Contents as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Take the contents.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Write little-endian `u64` values into `region`.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` if the region exceeds the buffer or cannot
    /// hold every value.
    pub fn write_u64s(&mut self, region: Region, values: &[u64]) -> Result<()> {
        region.check(self.len())?;
        let needed = values.len() * 8;
        if needed > region.len {
            return Err(Error::BufferTooSmall { needed, available: region.len });
        }
        let dst = &mut self.data[region.offset..region.offset + needed];
        for (slot, value) in dst.chunks_exact_mut(8).zip(values) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    /// Read the little-endian `u64` values stored in `region`.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` if the region exceeds the buffer.
    pub fn read_u64s(&self, region: Region) -> Result<Vec<u64>> {
        region.check(self.len())?;
        Ok(decode_u64s(&self.data[region.offset..region.end()]))
    }
}

/// Decode little-endian `u64` words; a trailing partial word is ignored.
pub(crate) fn decode_u64s(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|word| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(word);
            u64::from_le_bytes(raw)
        })
        .collect()
}
