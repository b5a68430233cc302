//! In-order work streams.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{trace, warn};

use super::{Device, DeviceBuffer, HostBuffer};
use crate::{Error, Result};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

struct Task {
    label: &'static str,
    job: Job,
}

#[derive(Default)]
struct State {
    pending: usize,
    error: Option<Error>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    idle: Condvar,
}

/// An in-order queue of device work.
///
/// Work runs on a dedicated worker thread in enqueue order. The first failure
/// is recorded, later work on the stream is skipped, and the failure is
/// reported by the next [`Stream::synchronize`].
pub struct Stream {
    id: u64,
    device: Device,
    shared: Arc<Shared>,
    sender: Option<mpsc::Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub(crate) fn new(device: Device, id: u64) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);
        let exec = device.execution_lock();

        let worker = thread::Builder::new()
            .name(format!("trueno-stream-{id}"))
            .spawn(move || run_worker(id, &receiver, &worker_shared, &exec))?;

        Ok(Self { id, device, shared, sender: Some(sender), worker: Some(worker) })
    }

    /// Stream identifier, unique per device.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Device the stream belongs to.
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Enqueue `job`; it runs after all previously enqueued work.
    pub(crate) fn enqueue<F>(&self, label: &'static str, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::DeviceExecution(format!("stream {} is closed", self.id)))?;

        self.shared.state.lock().pending += 1;
        if sender.send(Task { label, job: Box::new(job) }).is_err() {
            let mut state = self.shared.state.lock();
            state.pending -= 1;
            if state.pending == 0 {
                self.shared.idle.notify_all();
            }
            return Err(Error::DeviceExecution(format!("stream {} worker exited", self.id)));
        }
        trace!(stream = self.id, label, "enqueued");
        Ok(())
    }

    /// Block until all enqueued work has finished.
    ///
    /// # Errors
    ///
    /// Returns the first `DeviceExecution` error raised since the last
    /// synchronization. The error is cleared, so the stream stays usable.
    pub fn synchronize(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        while state.pending > 0 {
            self.shared.idle.wait(&mut state);
        }
        match state.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Enqueue a copy of `src` into `dst` starting at byte `offset`.
    ///
    /// The host buffer is moved into the transfer, so it cannot be modified
    /// while the copy is in flight.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` if the data does not fit at `offset`.
    pub fn copy_to_device(&self, src: HostBuffer, dst: &DeviceBuffer, offset: usize) -> Result<()> {
        let needed = offset.saturating_add(src.len());
        if needed > dst.len() {
            return Err(Error::BufferTooSmall { needed, available: dst.len() });
        }

        let alloc = Arc::clone(dst.allocation());
        self.device.record_h2d();
        self.enqueue("h2d", move || {
            // SAFETY: range checked above; stream work holds the device
            // execution lock, so no kernel touches the buffer concurrently.
            let dst = unsafe { alloc.bytes_mut(offset, src.len()) };
            dst.copy_from_slice(src.as_slice());
            Ok(())
        })
    }

    /// Copy the whole of `src` back to the host.
    ///
    /// Synchronizes the stream: the copy is ordered after all enqueued work.
    ///
    /// # Errors
    ///
    /// Returns any `DeviceExecution` error pending on the stream.
    pub fn copy_to_host(&self, src: &DeviceBuffer) -> Result<HostBuffer> {
        let alloc = Arc::clone(src.allocation());
        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);

        self.device.record_d2h();
        self.enqueue("d2h", move || {
            // SAFETY: whole-allocation read under the device execution lock
            let bytes = unsafe { alloc.bytes(0, alloc.len()) }.to_vec();
            *out.lock() = Some(bytes);
            Ok(())
        })?;
        self.synchronize()?;

        let bytes = slot.lock().take();
        bytes
            .map(HostBuffer::from_vec)
            .ok_or_else(|| Error::DeviceExecution("device-to-host copy produced no data".to_string()))
    }
}

fn run_worker(id: u64, receiver: &mpsc::Receiver<Task>, shared: &Shared, exec: &Mutex<()>) {
    for Task { label, job } in receiver.iter() {
        let skip = shared.state.lock().error.is_some();
        let result = if skip {
            trace!(stream = id, label, "skipped after earlier failure");
            drop(job);
            Ok(())
        } else {
            let _guard = exec.lock();
            match catch_unwind(AssertUnwindSafe(job)) {
                Ok(result) => result,
                Err(_) => Err(Error::DeviceExecution(format!("{label} panicked"))),
            }
        };

        let mut state = shared.state.lock();
        if let Err(err) = result {
            warn!(stream = id, label, error = %err, "device work failed");
            let err = if err.is_device_execution() {
                err
            } else {
                Error::DeviceExecution(format!("{label}: {err}"))
            };
            state.error.get_or_insert(err);
        }
        state.pending -= 1;
        if state.pending == 0 {
            shared.idle.notify_all();
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(stream = self.id, "stream worker panicked");
            }
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").field("id", &self.id).finish_non_exhaustive()
    }
}
