//! The capability kernel boundary (spec §4.A).
//!
//! Everything above this trait — handles, the wire codec, the async waiter,
//! the router — is written against `dyn Kernel` and never assumes a
//! particular transport. A production embedder would implement this over
//! real syscalls; [`crate::mock::MockKernel`] implements it in-process for
//! tests and for running the rest of the stack without an external kernel.

use crate::result::KernelResult;
pub use crate::result::Deadline;
use crate::signals::{SignalState, Signals};

/// Raw, kernel-assigned handle id. `0xFFFF_FFFF` is reserved as the
/// "invalid handle" sentinel, matching the wire encoding in spec §3.
pub type RawHandle = u32;

/// Sentinel raw handle value denoting "no handle" / "invalid".
pub const INVALID_HANDLE: RawHandle = u32::MAX;

/// Creation options for a data pipe. `None` at the call site selects the
/// kernel's default element size and capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPipeOptions {
    pub element_size: u32,
    pub capacity_bytes: u32,
}

impl Default for DataPipeOptions {
    fn default() -> Self {
        Self {
            element_size: 1,
            capacity_bytes: 64 * 1024,
        }
    }
}

/// The narrow capability boundary described in spec §4.A.
///
/// Every non-wait call is expected to serialize internally behind a single
/// mutex (see the "process-wide kernel mutex" design note); `wait` and
/// `wait_many` must remain invokable concurrently with everything else and
/// with each other.
pub trait Kernel: Send + Sync {
    /// Creates a message pipe, returning both endpoints.
    fn create_message_pipe(&self) -> (RawHandle, RawHandle);

    /// Creates a data pipe, returning `(producer, consumer)`.
    fn create_data_pipe(
        &self,
        opts: Option<DataPipeOptions>,
    ) -> Result<(RawHandle, RawHandle), KernelResult>;

    /// Creates a shared buffer of `num_bytes`.
    fn create_shared_buffer(&self, num_bytes: u64) -> Result<RawHandle, KernelResult>;

    /// Duplicates a shared buffer handle; both handles refer to the same
    /// underlying memory.
    fn duplicate_shared_buffer(&self, handle: RawHandle) -> Result<RawHandle, KernelResult>;

    /// Maps `num_bytes` starting at `offset` and returns a snapshot of the
    /// mapped region. Mutations must be written back via [`Self::unmap_buffer`].
    fn map_buffer(
        &self,
        handle: RawHandle,
        offset: u64,
        num_bytes: usize,
    ) -> Result<Vec<u8>, KernelResult>;

    /// Writes a previously mapped region back and releases the mapping.
    fn unmap_buffer(&self, handle: RawHandle, offset: u64, data: &[u8]) -> Result<(), KernelResult>;

    /// Reads one message (bytes + attached handles) without blocking.
    /// Returns [`KernelResult::ShouldWait`] if the pipe has no message
    /// queued.
    fn read_message(&self, handle: RawHandle) -> Result<(Vec<u8>, Vec<RawHandle>), KernelResult>;

    /// Writes one message, transferring ownership of `handles` to the
    /// receiver.
    fn write_message(&self, handle: RawHandle, bytes: &[u8], handles: Vec<RawHandle>) -> KernelResult;

    /// Reads up to `max_bytes` from a data pipe consumer without blocking.
    fn read_data(&self, handle: RawHandle, max_bytes: usize) -> Result<Vec<u8>, KernelResult>;

    /// Begins a two-phase read, locking the handle into `Busy` until the
    /// matching [`Self::end_read_data`]. Returns up to `num_bytes` of
    /// readable data.
    fn begin_read_data(&self, handle: RawHandle, num_bytes: usize) -> Result<Vec<u8>, KernelResult>;

    /// Completes a two-phase read, committing `num_bytes_read` as consumed.
    fn end_read_data(&self, handle: RawHandle, num_bytes_read: usize) -> KernelResult;

    /// Writes `data` to a data pipe producer without blocking, returning the
    /// number of bytes actually accepted.
    fn write_data(&self, handle: RawHandle, data: &[u8]) -> Result<usize, KernelResult>;

    /// Begins a two-phase write, locking the handle into `Busy`.
    fn begin_write_data(&self, handle: RawHandle, num_bytes: usize) -> KernelResult;

    /// Stages `data` into the reserved two-phase write region, returning the
    /// number of bytes staged.
    fn commit_write_data(&self, handle: RawHandle, data: &[u8]) -> Result<usize, KernelResult>;

    /// Completes a two-phase write, committing `num_bytes_written` staged
    /// bytes and releasing the `Busy` lock.
    fn end_write_data(&self, handle: RawHandle, num_bytes_written: usize) -> KernelResult;

    /// Blocks until any signal in `signals` is satisfied, it becomes known
    /// none ever will be, or `deadline` elapses.
    fn wait(&self, handle: RawHandle, signals: Signals, deadline: Deadline) -> (KernelResult, SignalState);

    /// As if [`Self::wait`] were called on every `(handle, signals)` pair
    /// simultaneously, returning as soon as the first would complete.
    /// `index` identifies which handle triggered completion; `None` means
    /// the failure (e.g. `DeadlineExceeded`) was not attributable to one
    /// handle.
    fn wait_many(
        &self,
        handles: &[RawHandle],
        signals: &[Signals],
        deadline: Deadline,
    ) -> (KernelResult, Option<usize>, Vec<SignalState>);

    /// Closes a handle. Closing an already-closed or unknown handle returns
    /// [`KernelResult::InvalidArgument`].
    fn close(&self, handle: RawHandle) -> KernelResult;

    /// Monotonic tick count, used only for diagnostics in this core.
    fn get_time_ticks_now(&self) -> i64;
}
