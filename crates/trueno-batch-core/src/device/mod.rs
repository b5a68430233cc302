//! Simulated device runtime.
//!
//! Device memory is host RAM owned by the runtime and addressed through
//! 64-bit device addresses. Work is submitted to in-order [`Stream`]s and
//! kernels run their execution groups on the rayon pool.
//!
//! # Example
//!
//! ```
//! use trueno_batch_core::{Device, DeviceConfig};
//!
//! let device = Device::new(DeviceConfig::default());
//! let stream = device.create_stream()?;
//! let buffer = device.upload(b"hello device", &stream)?;
//! assert_eq!(stream.copy_to_host(&buffer)?.as_slice(), b"hello device");
//! # Ok::<(), trueno_batch_core::Error>(())
//! ```

mod memory;
mod stream;

pub use memory::{DeviceBuffer, HostBuffer, Region};
pub use stream::Stream;

pub(crate) use memory::{decode_u64s, Allocation};

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::config::DeviceConfig;
use crate::{Error, Result};

/// Device counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Device allocations made since creation.
    pub allocations: u64,
    /// Device allocations currently live.
    pub live_allocations: u64,
    /// Device bytes currently live.
    pub bytes_in_use: u64,
    /// High-water mark of `bytes_in_use`.
    pub peak_bytes_in_use: u64,
    /// Pinned host buffers handed out.
    pub host_allocations: u64,
    /// Kernel launches enqueued.
    pub kernel_launches: u64,
    /// Host-to-device transfers enqueued.
    pub h2d_transfers: u64,
    /// Device-to-host transfers enqueued.
    pub d2h_transfers: u64,
}

#[derive(Default)]
struct Registry {
    used: usize,
    peak: usize,
    live: BTreeMap<u64, Weak<Allocation>>,
}

#[derive(Default)]
struct Counters {
    allocations: AtomicU64,
    host_allocations: AtomicU64,
    kernel_launches: AtomicU64,
    h2d_transfers: AtomicU64,
    d2h_transfers: AtomicU64,
}

pub(crate) struct DeviceInner {
    config: DeviceConfig,
    registry: Mutex<Registry>,
    exec: Arc<Mutex<()>>,
    counters: Counters,
    next_stream: AtomicU64,
}

impl DeviceInner {
    /// Called from `Allocation::drop`.
    pub(crate) fn release(&self, address: u64, len: usize) {
        let mut registry = self.registry.lock();
        registry.live.remove(&address);
        registry.used -= len;
        trace!(address = format_args!("{address:#x}"), len, "device free");
    }
}

/// Handle to a simulated device. Cheap to clone.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Create a device with the given limits.
    #[must_use]
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                config,
                registry: Mutex::new(Registry::default()),
                exec: Arc::new(Mutex::new(())),
                counters: Counters::default(),
                next_stream: AtomicU64::new(0),
            }),
        }
    }

    /// Device limits.
    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Allocate `len` bytes of zeroed device memory.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` when the allocation would exceed the device
    /// memory limit.
    pub fn allocate(&self, len: usize) -> Result<DeviceBuffer> {
        let mut registry = self.inner.registry.lock();
        let available = self.inner.config.memory_limit.saturating_sub(registry.used);
        if len > available {
            debug!(requested = len, available, "device allocation refused");
            return Err(Error::OutOfMemory { requested: len, available });
        }

        let alloc = Allocation::new(Arc::clone(&self.inner), len);
        registry.used += len;
        registry.peak = registry.peak.max(registry.used);
        registry.live.insert(alloc.address(), Arc::downgrade(&alloc));
        self.inner.counters.allocations.fetch_add(1, Ordering::Relaxed);
        trace!(address = format_args!("{:#x}", alloc.address()), len, "device alloc");
        drop(registry);

        Ok(DeviceBuffer::from_allocation(alloc))
    }

    /// Allocate a zeroed pinned host buffer for staging.
    ///
    /// # Errors
    ///
    /// Infallible in the simulator; kept fallible to mirror real pinned
    /// allocators.
    pub fn allocate_host(&self, len: usize) -> Result<HostBuffer> {
        self.inner.counters.host_allocations.fetch_add(1, Ordering::Relaxed);
        Ok(HostBuffer::zeroed(len))
    }

    /// Create a new in-order stream on this device.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the stream worker thread cannot be spawned.
    pub fn create_stream(&self) -> Result<Stream> {
        let id = self.inner.next_stream.fetch_add(1, Ordering::Relaxed);
        Stream::new(self.clone(), id)
    }

    /// Allocate a device buffer and enqueue a copy of `data` into it.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the allocation fails.
    pub fn upload(&self, data: &[u8], stream: &Stream) -> Result<DeviceBuffer> {
        let buffer = self.allocate(data.len())?;
        let mut staging = self.allocate_host(data.len())?;
        staging.as_mut_slice().copy_from_slice(data);
        stream.copy_to_device(staging, &buffer, 0)?;
        Ok(buffer)
    }

    /// Snapshot of the device counters.
    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        let registry = self.inner.registry.lock();
        let counters = &self.inner.counters;
        DeviceStats {
            allocations: counters.allocations.load(Ordering::Relaxed),
            live_allocations: registry.live.len() as u64,
            bytes_in_use: registry.used as u64,
            peak_bytes_in_use: registry.peak as u64,
            host_allocations: counters.host_allocations.load(Ordering::Relaxed),
            kernel_launches: counters.kernel_launches.load(Ordering::Relaxed),
            h2d_transfers: counters.h2d_transfers.load(Ordering::Relaxed),
            d2h_transfers: counters.d2h_transfers.load(Ordering::Relaxed),
        }
    }

    /// Device bytes currently live.
    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.inner.registry.lock().used
    }

    /// Resolve `[address, address + len)` to the live allocation containing it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if no live allocation covers the range.
    pub(crate) fn resolve(&self, address: u64, len: u64) -> Result<Arc<Allocation>> {
        let candidate = {
            let registry = self.inner.registry.lock();
            registry.live.range(..=address).next_back().and_then(|(_, weak)| weak.upgrade())
        };
        // The lock is released before `candidate` can drop, since dropping the
        // last reference re-enters the registry.
        match candidate {
            Some(alloc) if alloc.contains(address, len) => Ok(alloc),
            _ => Err(Error::InvalidAddress(format!(
                "{address:#x}+{len} is not inside a live device allocation"
            ))),
        }
    }

    pub(crate) fn execution_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.inner.exec)
    }

    pub(crate) fn record_launch(&self) {
        self.inner.counters.kernel_launches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_h2d(&self) {
        self.inner.counters.h2d_transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_d2h(&self) {
        self.inner.counters.d2h_transfers.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new(DeviceConfig::default())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
