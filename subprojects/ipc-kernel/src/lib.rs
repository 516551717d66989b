//! The capability-kernel boundary: a narrow, object-safe trait
//! (message pipes, data pipes, shared buffers, wait/wait_many) that
//! everything above it — handles, the wire codec, the async waiter, the
//! router — is written against, plus an in-process [`MockKernel`] to run
//! that stack without a real kernel underneath.

mod mock;
mod result;
mod signals;
mod traits;

pub use mock::MockKernel;
pub use result::{Deadline, KernelResult};
pub use signals::{SignalState, Signals};
pub use traits::{DataPipeOptions, Kernel, RawHandle, INVALID_HANDLE};
