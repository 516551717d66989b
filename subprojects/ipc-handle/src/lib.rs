//! Typed, owning wrappers around the raw handles [`ipc_kernel::Kernel`]
//! hands out.
//!
//! A bare [`ipc_kernel::RawHandle`] is just a `u32`; nothing stops a caller
//! from reading a data pipe consumer as if it were a message pipe. The types
//! here close that gap the same way the kernel crate's own handle newtypes
//! do: one wrapper per kind, sealed [`Waitable`] implemented only where the
//! kernel actually has signals to offer, and an owning [`Drop`] that closes
//! the handle (and logs if the kernel claims it was already invalid) so a
//! leaked proxy or stub doesn't leak a kernel object too.

mod handle;
mod owned;

pub use handle::{
    DataConsumerHandle, DataProducerHandle, MessageHandle, SharedBufferHandle, UntypedHandle, Waitable,
};
pub use owned::{HandleError, RawOwnedHandle};

use std::sync::Arc;

use ipc_kernel::{DataPipeOptions, Kernel, KernelResult};

/// Creates a message pipe and wraps both ends as [`MessageHandle`]s.
pub fn create_message_pipe(kernel: &Arc<dyn Kernel>) -> (MessageHandle, MessageHandle) {
    let (a, b) = kernel.create_message_pipe();
    (MessageHandle::new(kernel.clone(), a), MessageHandle::new(kernel.clone(), b))
}

/// Creates a data pipe and wraps both ends as typed handles.
pub fn create_data_pipe(
    kernel: &Arc<dyn Kernel>,
    opts: Option<DataPipeOptions>,
) -> Result<(DataProducerHandle, DataConsumerHandle), KernelResult> {
    let (producer, consumer) = kernel.create_data_pipe(opts)?;
    Ok((DataProducerHandle::new(kernel.clone(), producer), DataConsumerHandle::new(kernel.clone(), consumer)))
}

/// Creates a shared buffer handle.
pub fn create_shared_buffer(kernel: &Arc<dyn Kernel>, num_bytes: u64) -> Result<SharedBufferHandle, KernelResult> {
    let raw = kernel.create_shared_buffer(num_bytes)?;
    Ok(SharedBufferHandle::new(kernel.clone(), raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc_kernel::{MockKernel, Signals};

    fn kernel() -> Arc<dyn Kernel> {
        Arc::new(MockKernel::new())
    }

    #[test]
    fn message_handle_closes_on_drop() {
        let kernel = kernel();
        let (a, b) = create_message_pipe(&kernel);
        let raw_a = a.raw();
        drop(a);
        assert_eq!(kernel.close(raw_a), KernelResult::InvalidArgument);
        drop(b);
    }

    #[test]
    fn invalid_handle_drop_is_a_no_op() {
        let h = MessageHandle::invalid();
        assert!(!h.is_valid());
        drop(h);
    }

    #[test]
    fn close_is_idempotent_and_detects_double_close() {
        let kernel = kernel();
        let (a, _b) = create_message_pipe(&kernel);
        assert!(a.is_valid());
        assert_eq!(a.close(), KernelResult::Ok);
        assert!(!a.is_valid());
        assert_eq!(a.close(), KernelResult::InvalidArgument);
    }

    #[test]
    fn closing_the_invalid_handle_singleton_returns_invalid_argument() {
        let h = MessageHandle::invalid();
        assert_eq!(h.close(), KernelResult::InvalidArgument);
    }

    #[test]
    fn waitable_message_handle_reports_peer_closed() {
        let kernel = kernel();
        let (a, b) = create_message_pipe(&kernel);
        drop(a);
        let (result, state) = kernel.wait(b.raw_handle(), Signals::PEER_CLOSED, None);
        assert_eq!(result, KernelResult::Ok);
        assert!(state.satisfied.is_peer_closed());
    }

    #[test]
    fn release_native_invalidates_without_closing() {
        let kernel = kernel();
        let (a, b) = create_message_pipe(&kernel);
        let raw_a = a.raw();
        let released = a.release_native();
        assert_eq!(released, raw_a);
        // Still open at the kernel: writing through the peer succeeds.
        assert_eq!(kernel.write_message(b.raw(), b"hi", vec![]), KernelResult::Ok);
        assert_eq!(kernel.close(raw_a), KernelResult::Ok);
    }

    #[test]
    fn untyped_roundtrip_preserves_raw_handle() {
        let kernel = kernel();
        let (a, _b) = create_message_pipe(&kernel);
        let raw = a.raw();
        let untyped = a.into_untyped();
        assert_eq!(untyped.raw(), raw);
        let back = untyped.into_message_handle();
        assert_eq!(back.raw(), raw);
    }
}
