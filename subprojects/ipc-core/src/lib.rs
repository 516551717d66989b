//! `ipc-core`: the facade crate binding the IPC bindings runtime's layers
//! together behind Cargo features, the way `nx-std` binds the `nx-*`
//! layers of its own workspace.
//!
//! Each layer is its own crate and can be depended on directly; this crate
//! exists for embedders that want the whole stack (or a contiguous slice
//! of it) under one name and one set of feature flags instead of six path
//! dependencies. No feature here adds behavior beyond re-exporting its
//! crate's public API under a short module name.

#[cfg(feature = "kernel")]
pub mod kernel {
    pub use ipc_kernel::*;
}

#[cfg(feature = "handle")]
pub mod handle {
    pub use ipc_handle::*;
}

#[cfg(feature = "wire")]
pub mod wire {
    pub use ipc_wire::*;
}

#[cfg(feature = "waiter")]
pub mod waiter {
    pub use ipc_waiter::*;
}

#[cfg(feature = "router")]
pub mod router {
    pub use ipc_router::*;
}

#[cfg(feature = "stub")]
pub mod stub {
    pub use ipc_stub::*;
}

/// Tunable constants carried from the Go reference implementation's
/// buffered-channel depths (spec.md §6 "no ... persisted state is part of
/// the core" rules out environment-driven configuration, so these stay
/// compile-time constants, not a runtime config struct).
///
/// Each constant is defined and used where it actually matters (a
/// preallocation hint for that layer's internal collections) and
/// re-exported here only for discoverability; see
/// [`ipc_waiter::WAIT_QUEUE_CAPACITY_HINT`] and
/// [`ipc_router::RESPONDER_CAPACITY_HINT`] for where each is applied.
pub mod config {
    #[cfg(feature = "waiter")]
    pub use ipc_waiter::WAIT_QUEUE_CAPACITY_HINT;
    #[cfg(feature = "router")]
    pub use ipc_router::RESPONDER_CAPACITY_HINT;
}
