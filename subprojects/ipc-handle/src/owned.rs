//! The untyped owned-handle primitive every typed wrapper builds on.

use std::fmt;
use std::sync::{Arc, Mutex};

use ipc_kernel::{Kernel, KernelResult, RawHandle, INVALID_HANDLE};

struct Inner {
    kernel: Option<Arc<dyn Kernel>>,
    raw: RawHandle,
}

/// The handle-level error double-close detection produces internally.
/// Callers never see this type directly: every public handle method
/// surfaces it as [`KernelResult::InvalidArgument`] (spec §4.B "detects
/// double-close ... mapped to kernel InvalidArgument"), keeping `Close`'s
/// signature consistent with every other `Kernel`-backed operation in this
/// core rather than introducing a second error type at the handle layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("handle already closed")]
    AlreadyClosed,
}

impl From<HandleError> for KernelResult {
    fn from(_: HandleError) -> Self {
        KernelResult::InvalidArgument
    }
}

/// A raw handle bound to the kernel that minted it, closed on drop.
///
/// Typed wrappers ([`crate::MessageHandle`] and friends) are newtypes around
/// this; it carries the `Arc<dyn Kernel>` so any handle can close itself
/// without its owner threading a kernel reference through every call site.
///
/// `close`/`release_native` take `&self`, not `self`, so that spec §8's
/// "idempotent close" property (`h.close(); h.close()` returns `Ok` then
/// `InvalidArgument`, with `h.is_valid()` false after either) can be
/// exercised on the same binding rather than being ruled out at compile
/// time by a move. The `Mutex` is the interior-mutability cost of that:
/// contention is a non-issue since every caller closes a handle at most
/// twice (once to transition it, once to observe the error).
pub struct RawOwnedHandle {
    inner: Mutex<Inner>,
}

impl RawOwnedHandle {
    /// Wraps an already-created raw handle.
    pub fn new(kernel: Arc<dyn Kernel>, raw: RawHandle) -> Self {
        Self { inner: Mutex::new(Inner { kernel: Some(kernel), raw }) }
    }

    /// The canonical invalid handle: no kernel, no resource, closing it
    /// returns `InvalidArgument` like any already-closed handle. Used as a
    /// placeholder where a handle slot must be filled but nothing has been
    /// received yet (spec §3 "untyped handle").
    pub fn invalid() -> Self {
        Self { inner: Mutex::new(Inner { kernel: None, raw: INVALID_HANDLE }) }
    }

    pub fn raw(&self) -> RawHandle {
        self.inner.lock().unwrap().raw
    }

    pub fn is_valid(&self) -> bool {
        self.raw() != INVALID_HANDLE
    }

    /// Closes the handle, returning the kernel's result. A handle that is
    /// already invalid (never valid, already closed, or transferred via
    /// [`Self::release_native`]) returns [`KernelResult::InvalidArgument`]
    /// without touching the kernel (spec §4.B "the type itself must detect
    /// double-close").
    pub fn close(&self) -> KernelResult {
        let mut inner = self.inner.lock().unwrap();
        if inner.raw == INVALID_HANDLE {
            return HandleError::AlreadyClosed.into();
        }
        let raw = std::mem::replace(&mut inner.raw, INVALID_HANDLE);
        match inner.kernel.take() {
            Some(kernel) => kernel.close(raw),
            None => KernelResult::Ok,
        }
    }

    /// Yields the raw handle id and invalidates this wrapper without
    /// closing the underlying resource. Used when ownership is transferred
    /// elsewhere (e.g. attaching a handle to an outgoing message) rather
    /// than released. Returns [`ipc_kernel::INVALID_HANDLE`] if called on an
    /// already-invalid handle.
    pub fn release_native(&self) -> RawHandle {
        let mut inner = self.inner.lock().unwrap();
        inner.kernel = None;
        std::mem::replace(&mut inner.raw, INVALID_HANDLE)
    }
}

impl fmt::Debug for RawOwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawOwnedHandle").field("raw", &self.raw()).finish()
    }
}

impl Drop for RawOwnedHandle {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.raw == INVALID_HANDLE {
            return;
        }
        let raw = std::mem::replace(&mut inner.raw, INVALID_HANDLE);
        if let Some(kernel) = inner.kernel.take() {
            let result = kernel.close(raw);
            tracing::warn!(raw, ?result, "handle dropped without explicit close; closed as a leak");
        }
    }
}
