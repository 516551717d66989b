//! Typed wrappers for the two ends of an interface's message pipe (spec
//! §4.G). Ground: `mojo/public/go/bindings/interface.go`.

use std::sync::Arc;

use ipc_handle::MessageHandle;
use ipc_kernel::Kernel;

/// A request from a remote client for an implementation of some interface,
/// carried as one end of a message pipe. The implementor passes the
/// message pipe to a [`crate::Stub`] via [`Self::pass_message_pipe`] and
/// attaches its own implementation to the other side.
pub struct InterfaceRequest(MessageHandle);

/// The other end of an [`InterfaceRequest`]'s message pipe, with an
/// interface implementation attached on the request side. The client
/// passes the message pipe to a generated `Proxy` via
/// [`Self::pass_message_pipe`].
pub struct InterfacePointer(MessageHandle);

impl InterfaceRequest {
    /// Takes ownership of the underlying message pipe handle, invalidating
    /// this wrapper.
    pub fn pass_message_pipe(self) -> MessageHandle {
        self.0
    }
}

impl InterfacePointer {
    /// Takes ownership of the underlying message pipe handle, invalidating
    /// this wrapper.
    pub fn pass_message_pipe(self) -> MessageHandle {
        self.0
    }
}

/// Creates a message pipe with an [`InterfaceRequest`] on one end and an
/// [`InterfacePointer`] on the other (ground:
/// `CreateMessagePipeForMojoInterface`).
pub fn create_message_pipe_for_interface(kernel: &Arc<dyn Kernel>) -> (InterfaceRequest, InterfacePointer) {
    let (request_side, pointer_side) = ipc_handle::create_message_pipe(kernel);
    (InterfaceRequest(request_side), InterfacePointer(pointer_side))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc_kernel::MockKernel;

    #[test]
    fn created_pipe_ends_are_connected() {
        let kernel: Arc<dyn Kernel> = Arc::new(MockKernel::new());
        let (request, pointer) = create_message_pipe_for_interface(&kernel);
        let request_pipe = request.pass_message_pipe();
        let pointer_pipe = pointer.pass_message_pipe();

        assert_eq!(kernel.write_message(pointer_pipe.raw(), b"hi", vec![]), ipc_kernel::KernelResult::Ok);
        let (bytes, _) = kernel.read_message(request_pipe.raw()).unwrap();
        assert_eq!(bytes, b"hi");
    }
}
