//! Typed handle wrappers.
//!
//! Four handle kinds are exchanged across this core's boundary (spec §3):
//! message pipe endpoints, the two data pipe endpoints, shared buffers, and
//! an untyped handle used when a value's kind isn't known until the wire
//! codec resolves it. Only the first three are waitable.

use ipc_kernel::{Kernel, RawHandle};
use std::sync::Arc;

use crate::owned::RawOwnedHandle;

/// A handle that can be passed to [`Kernel::wait`] / [`Kernel::wait_many`].
pub trait Waitable: _priv::Sealed {
    fn raw_handle(&self) -> RawHandle;
}

pub(crate) mod _priv {
    pub trait Sealed {}
}

macro_rules! define_handle_type {
    ($(#[$meta:meta])* $vis:vis struct $name:ident) => {
        $(#[$meta])*
        $vis struct $name(RawOwnedHandle);

        impl $name {
            /// Wraps a raw handle minted by `kernel`.
            pub fn new(kernel: Arc<dyn Kernel>, raw: RawHandle) -> Self {
                Self(RawOwnedHandle::new(kernel, raw))
            }

            /// The canonical invalid instance of this handle kind.
            pub fn invalid() -> Self {
                Self(RawOwnedHandle::invalid())
            }

            /// Returns `true` if this handle refers to a live kernel object.
            pub fn is_valid(&self) -> bool {
                self.0.is_valid()
            }

            /// The raw handle id, for passing to [`Kernel`] calls directly.
            pub fn raw(&self) -> RawHandle {
                self.0.raw()
            }

            /// Closes the handle, returning the kernel's result. Idempotent
            /// in the sense that a second call is well-defined (spec §8
            /// "idempotent close"): it observes the handle already invalid
            /// and returns [`ipc_kernel::KernelResult::InvalidArgument`]
            /// instead of calling the kernel again.
            pub fn close(&self) -> ipc_kernel::KernelResult {
                self.0.close()
            }

            /// Yields the raw handle id and invalidates this wrapper
            /// without closing the underlying resource (spec §4.B
            /// `release_native`). Used when ownership moves elsewhere, e.g.
            /// attaching a handle to an outgoing message.
            pub fn release_native(&self) -> RawHandle {
                self.0.release_native()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.0.raw()).finish()
            }
        }
    };
}

macro_rules! define_waitable_handle_type {
    ($(#[$meta:meta])* $vis:vis struct $name:ident) => {
        define_handle_type! { $(#[$meta])* $vis struct $name }

        impl Waitable for $name {
            #[inline]
            fn raw_handle(&self) -> RawHandle {
                self.0.raw()
            }
        }

        impl _priv::Sealed for $name {}
    };
}

define_waitable_handle_type! {
    /// The client or server end of a message pipe.
    pub struct MessageHandle
}

define_waitable_handle_type! {
    /// The producer (write) end of a data pipe.
    pub struct DataProducerHandle
}

define_waitable_handle_type! {
    /// The consumer (read) end of a data pipe.
    pub struct DataConsumerHandle
}

define_handle_type! {
    /// A shared memory buffer handle. Not waitable: a shared buffer carries
    /// no readiness signals of its own.
    pub struct SharedBufferHandle
}

define_handle_type! {
    /// A handle of statically unknown kind, as received off the wire before
    /// the codec has resolved which handle-bearing field it fills.
    pub struct UntypedHandle
}

impl UntypedHandle {
    /// Reinterprets this handle as a [`MessageHandle`] without re-validating
    /// its kernel-side kind. The wire codec calls this once a descriptor's
    /// declared kind is known; callers elsewhere should prefer the typed
    /// constructors.
    pub fn into_message_handle(self) -> MessageHandle {
        MessageHandle(self.0)
    }

    pub fn into_data_producer_handle(self) -> DataProducerHandle {
        DataProducerHandle(self.0)
    }

    pub fn into_data_consumer_handle(self) -> DataConsumerHandle {
        DataConsumerHandle(self.0)
    }

    pub fn into_shared_buffer_handle(self) -> SharedBufferHandle {
        SharedBufferHandle(self.0)
    }
}

impl MessageHandle {
    pub fn into_untyped(self) -> UntypedHandle {
        UntypedHandle(self.0)
    }
}

impl DataProducerHandle {
    pub fn into_untyped(self) -> UntypedHandle {
        UntypedHandle(self.0)
    }
}

impl DataConsumerHandle {
    pub fn into_untyped(self) -> UntypedHandle {
        UntypedHandle(self.0)
    }
}

impl SharedBufferHandle {
    pub fn into_untyped(self) -> UntypedHandle {
        UntypedHandle(self.0)
    }
}
