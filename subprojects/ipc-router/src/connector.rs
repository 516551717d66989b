//! `Connector`: a message pipe with blocking reads that cooperate with the
//! async waiter (spec §4.E). Ground: `mojo/public/go/bindings/connector.go`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ipc_handle::MessageHandle;
use ipc_kernel::{Kernel, KernelResult};
use ipc_waiter::{AsyncWaitId, AsyncWaiter};
use ipc_wire::{parse_message, CodecError, Message};

/// A failure reading or writing a message pipe: either the kernel result
/// that caused it, or a malformed inbound message. Kept as two variants
/// (rather than collapsing a decode failure into a generic kernel error)
/// so a corrupt peer surfaces its actual validation code to the caller
/// instead of an opaque `Internal` (spec §4.G / §7: codec errors surface
/// immediately to the calling proxy or serving stub). Ground: Go's
/// `ConnectionError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("message pipe error: {0}")]
    Kernel(KernelResult),
    #[error("malformed message: {0}")]
    Codec(CodecError),
}

impl ConnectionError {
    /// The error every operation on an already-closed connector returns.
    pub fn closed() -> Self {
        Self::Kernel(KernelResult::FailedPrecondition)
    }

    /// Returns `true` iff this error was caused by the peer (or this side)
    /// having closed the pipe, as opposed to some other kernel failure or a
    /// decode failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Kernel(result) if result.closed())
    }
}

impl From<KernelResult> for ConnectionError {
    fn from(result: KernelResult) -> Self {
        Self::Kernel(result)
    }
}

impl From<CodecError> for ConnectionError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

/// Owns a message pipe handle; reads and writes messages from it, waiting
/// on it if necessary. Safe to share across threads: `read_message` may be
/// called concurrently with `write_message`, and `close` interrupts any
/// in-flight read.
pub struct Connector {
    kernel: Arc<dyn Kernel>,
    waiter: Arc<AsyncWaiter>,
    // Serializes concurrent readers the same way the Go implementation's
    // `waitMutex` does: only one goroutine at a time registers an async
    // wait on the pipe.
    read_mutex: Mutex<()>,
    pipe: RwLock<MessageHandle>,
    closed: AtomicBool,
    pending_wait: Mutex<Option<AsyncWaitId>>,
}

impl Connector {
    /// Wraps `pipe`, using `waiter` for any read that would otherwise
    /// block.
    pub fn new(kernel: Arc<dyn Kernel>, waiter: Arc<AsyncWaiter>, pipe: MessageHandle) -> Self {
        Self {
            kernel,
            waiter,
            read_mutex: Mutex::new(()),
            pipe: RwLock::new(pipe),
            closed: AtomicBool::new(false),
            pending_wait: Mutex::new(None),
        }
    }

    /// Reads one message, waiting on the pipe if none is queued yet.
    /// Returns [`ConnectionError::closed`] if `close` is called while this
    /// call is waiting, or if the connector was already closed.
    pub fn read_message(&self) -> Result<Message, ConnectionError> {
        // Acquired first, matching Go's ordering, so a queue of concurrent
        // readers waits rather than racing `close`'s pipe swap.
        let _read_guard = self.read_mutex.lock().unwrap();
        let pipe = self.pipe.read().unwrap();

        if self.closed.load(Ordering::Acquire) || !pipe.is_valid() {
            return Err(ConnectionError::closed());
        }

        match self.kernel.read_message(pipe.raw()) {
            Ok((bytes, raw_handles)) => self.finish_read(bytes, raw_handles),
            Err(KernelResult::ShouldWait) => {
                let (id, rx) = self.waiter.async_wait(&*pipe, ipc_kernel::Signals::READABLE);
                *self.pending_wait.lock().unwrap() = Some(id);
                let response = rx.recv();
                *self.pending_wait.lock().unwrap() = None;

                match response {
                    Ok(wait_response) if wait_response.result == KernelResult::Aborted => {
                        Err(ConnectionError::closed())
                    }
                    Ok(wait_response) if wait_response.result != KernelResult::Ok => {
                        Err(ConnectionError::Kernel(wait_response.result))
                    }
                    Ok(_) => match self.kernel.read_message(pipe.raw()) {
                        Ok((bytes, raw_handles)) => self.finish_read(bytes, raw_handles),
                        Err(result) => Err(ConnectionError::Kernel(result)),
                    },
                    // The waiter was dropped out from under us; treat the
                    // same as a cancelled wait.
                    Err(_) => Err(ConnectionError::closed()),
                }
            }
            Err(result) => Err(ConnectionError::Kernel(result)),
        }
    }

    fn finish_read(&self, bytes: Vec<u8>, raw_handles: Vec<ipc_kernel::RawHandle>) -> Result<Message, ConnectionError> {
        let handles = raw_handles
            .into_iter()
            .map(|raw| ipc_handle::UntypedHandle::new(self.kernel.clone(), raw))
            .collect();
        Ok(parse_message(bytes, handles)?)
    }

    /// Writes `message` to the pipe, handing off ownership of its attached
    /// handles to the kernel.
    pub fn write_message(&self, message: Message) -> Result<(), ConnectionError> {
        let pipe = self.pipe.read().unwrap();
        if self.closed.load(Ordering::Acquire) || !pipe.is_valid() {
            return Err(ConnectionError::closed());
        }
        let raw_handles = message.handles.into_iter().map(|h| h.release_native()).collect();
        match self.kernel.write_message(pipe.raw(), &message.bytes, raw_handles) {
            KernelResult::Ok => Ok(()),
            result => Err(ConnectionError::Kernel(result)),
        }
    }

    /// Closes the underlying message pipe, interrupting any in-flight
    /// `read_message` call. Safe to call more than once; later calls are a
    /// no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(id) = self.pending_wait.lock().unwrap().take() {
            self.waiter.cancel_wait(id);
        }
        let mut pipe = self.pipe.write().unwrap();
        let old = std::mem::replace(&mut *pipe, MessageHandle::invalid());
        let result = old.close();
        if result != KernelResult::Ok {
            tracing::warn!(?result, "connector pipe close returned non-ok result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc_wire::{encode_message, MessageFlags, MessageHeader, Payload};
    use std::thread;
    use std::time::Duration;

    struct Ping(u32);

    impl Payload for Ping {
        fn encode(&self, encoder: &mut ipc_wire::Encoder) -> Result<(), ipc_wire::CodecError> {
            encoder.start_struct(4, 0);
            encoder.write_uint32(self.0)?;
            encoder.finish()
        }

        fn decode(decoder: &mut ipc_wire::Decoder<'_>) -> Result<Self, ipc_wire::CodecError> {
            decoder.start_struct()?;
            let value = decoder.read_uint32()?;
            decoder.finish()?;
            Ok(Ping(value))
        }
    }

    fn kernel() -> Arc<dyn Kernel> {
        Arc::new(ipc_kernel::MockKernel::new())
    }

    #[test]
    fn reads_message_already_queued_without_blocking() {
        let kernel = kernel();
        let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
        let (a, b) = ipc_handle::create_message_pipe(&kernel);
        let header = MessageHeader { method_ordinal: 1, flags: MessageFlags::empty(), request_id: 0 };
        let message = encode_message(header, &Ping(7)).unwrap();
        kernel.write_message(a.raw(), &message.bytes, vec![]);

        let connector = Connector::new(kernel.clone(), waiter, b);
        let received = connector.read_message().unwrap();
        assert_eq!(received.header.method_ordinal, 1);
        let ping: Ping = received.decode_payload().unwrap();
        assert_eq!(ping.0, 7);
    }

    #[test]
    fn read_message_waits_then_resolves() {
        let kernel = kernel();
        let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
        let (a, b) = ipc_handle::create_message_pipe(&kernel);
        let connector = Arc::new(Connector::new(kernel.clone(), waiter, b));

        let reader = {
            let connector = connector.clone();
            thread::spawn(move || connector.read_message())
        };
        thread::sleep(Duration::from_millis(50));
        let header = MessageHeader { method_ordinal: 2, flags: MessageFlags::empty(), request_id: 0 };
        let message = encode_message(header, &Ping(9)).unwrap();
        kernel.write_message(a.raw(), &message.bytes, vec![]);

        let received = reader.join().unwrap().unwrap();
        assert_eq!(received.header.method_ordinal, 2);
    }

    #[test]
    fn close_interrupts_in_flight_read() {
        let kernel = kernel();
        let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
        let (_a, b) = ipc_handle::create_message_pipe(&kernel);
        let connector = Arc::new(Connector::new(kernel.clone(), waiter, b));

        let reader = {
            let connector = connector.clone();
            thread::spawn(move || connector.read_message())
        };
        thread::sleep(Duration::from_millis(50));
        connector.close();

        let err = reader.join().unwrap().unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn operations_after_close_return_closed_error() {
        let kernel = kernel();
        let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
        let (_a, b) = ipc_handle::create_message_pipe(&kernel);
        let connector = Connector::new(kernel.clone(), waiter, b);
        connector.close();
        connector.close(); // idempotent, no panic

        let err = connector.read_message().unwrap_err();
        assert!(err.is_closed());

        let header = MessageHeader { method_ordinal: 1, flags: MessageFlags::empty(), request_id: 0 };
        let message = encode_message(header, &Ping(1)).unwrap();
        let err = connector.write_message(message).unwrap_err();
        assert!(err.is_closed());
    }
}
