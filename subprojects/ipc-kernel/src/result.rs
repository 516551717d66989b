//! Coarse result enumeration returned by every [`crate::Kernel`] call.
//!
//! Mirrors the "OK, Cancelled, InvalidArgument, ..." result set a real
//! capability kernel (Zircon, Mojo's embedder) returns from every syscall:
//! one flat enum rather than a tree of per-call error types, because callers
//! up the stack (connector, router) only ever care about a handful of these
//! (`ShouldWait`, `FailedPrecondition`) and want to pass the rest through
//! opaquely.

use core::time::Duration;

/// Result of a kernel operation.
///
/// `Ok` is the only success variant; everything else is a failure. Modeled
/// as a closed enum (not a bitmask or raw integer) since the core never
/// needs to round-trip these across a wire — they're a host-side contract
/// between this crate and its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum KernelResult {
    #[error("ok")]
    Ok,
    #[error("cancelled")]
    Cancelled,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("permission denied")]
    PermissionDenied,
    #[error("resource exhausted")]
    ResourceExhausted,
    #[error("failed precondition")]
    FailedPrecondition,
    #[error("aborted")]
    Aborted,
    #[error("out of range")]
    OutOfRange,
    #[error("unimplemented")]
    Unimplemented,
    #[error("internal error")]
    Internal,
    #[error("unavailable")]
    Unavailable,
    #[error("data loss")]
    DataLoss,
    #[error("busy")]
    Busy,
    #[error("should wait")]
    ShouldWait,
    #[error("unknown kernel error")]
    Unknown,
}

impl KernelResult {
    /// Returns `true` for [`KernelResult::Ok`].
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, KernelResult::Ok)
    }

    /// Returns `true` iff the call would have blocked and must be retried
    /// through an async wait instead.
    #[inline]
    pub const fn is_should_wait(&self) -> bool {
        matches!(self, KernelResult::ShouldWait)
    }

    /// Returns `true` iff this result indicates the peer end of the
    /// resource has gone away for good. Connection-error callers use this
    /// to decide whether a failure is a permanent close or a transient one.
    #[inline]
    pub const fn closed(&self) -> bool {
        matches!(self, KernelResult::FailedPrecondition)
    }
}

/// `Some(duration)` is a finite deadline; `None` means wait indefinitely.
pub type Deadline = Option<Duration>;
