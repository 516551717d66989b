//! `Router`: sends messages over a message pipe and routes responses back
//! to whichever caller issued the matching request id (spec §4.F). Ground:
//! `mojo/public/go/bindings/router.go`.
//!
//! Go multiplexes one `select` over three channels (incoming requests, the
//! async waiter's response channel, and a shutdown signal). `std::sync::mpsc`
//! has no equivalent of `select`, so every event the worker reacts to is
//! funneled onto one channel as a [`WorkerEvent`]: the router's own senders
//! push `Request`s directly, and each outstanding async wait gets a
//! dedicated one-shot forwarding thread that blocks on the wait's receiver
//! and relays its single response as `WaitCompleted`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use ipc_handle::MessageHandle;
use ipc_kernel::{Kernel, KernelResult, Signals};
use ipc_waiter::{AsyncWaitId, AsyncWaiter, WaitResponse};
use ipc_wire::Message;

use crate::connector::ConnectionError;

/// Expected steady-state number of concurrently outstanding
/// response-bearing requests, used as a preallocation hint for the
/// worker's responder map. Ground: the same Go `make(chan ..., 10)` buffer
/// depth `ipc_waiter::WAIT_QUEUE_CAPACITY_HINT` is grounded on.
pub const RESPONDER_CAPACITY_HINT: usize = 10;

/// The outcome of reading one message off the wire: the message itself, or
/// the error that ended the router (pipe closed, a kernel failure, or a
/// malformed message).
pub type MessageReadResult = Result<Message, ConnectionError>;

enum WorkerEvent {
    Request { message: Message, response_tx: Option<Sender<MessageReadResult>> },
    WaitCompleted(WaitResponse),
    /// Sent exactly once by [`Router::close`]. The worker's own clone of
    /// `event_tx` keeps the channel open for the lifetime of the worker
    /// thread, so an explicit variant is needed here rather than relying on
    /// every sender dropping (Go's dedicated `done` channel, folded into
    /// this one).
    Shutdown,
}

/// Sends messages to a message pipe and correlates responses back to
/// callers by request id. The caller is responsible for issuing unique,
/// non-zero request ids for every call that expects a response.
pub struct Router {
    event_tx: Sender<WorkerEvent>,
    closed: AtomicBool,
}

impl Router {
    /// Starts routing over `pipe` on a background worker thread.
    pub fn new(kernel: Arc<dyn Kernel>, waiter: Arc<AsyncWaiter>, pipe: MessageHandle) -> Arc<Self> {
        let (event_tx, event_rx) = channel();
        let router = Arc::new(Self { event_tx: event_tx.clone(), closed: AtomicBool::new(false) });

        let worker = Worker {
            kernel,
            waiter,
            pipe,
            responders: HashMap::with_capacity(RESPONDER_CAPACITY_HINT),
            event_tx,
            wait_id: None,
        };
        thread::spawn(move || worker.run(event_rx));

        router
    }

    /// Sends `message` without expecting a response. `message`'s header
    /// must carry a zero request id.
    pub fn accept(&self, message: Message) -> Result<(), ConnectionError> {
        if message.header.request_id != 0 {
            return Err(ConnectionError::Kernel(KernelResult::InvalidArgument));
        }
        self.send(message, None)
    }

    /// Sends `message`, which must carry a non-zero request id, and returns
    /// a channel yielding its eventual response.
    pub fn accept_with_response(&self, message: Message) -> Receiver<MessageReadResult> {
        let (response_tx, response_rx) = channel();
        if message.header.request_id == 0 {
            let _ = response_tx.send(Err(ConnectionError::Kernel(KernelResult::InvalidArgument)));
            return response_rx;
        }
        if self.send(message, Some(response_tx.clone())).is_err() {
            let _ = response_tx.send(Err(ConnectionError::closed()));
        }
        response_rx
    }

    fn send(&self, message: Message, response_tx: Option<Sender<MessageReadResult>>) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::closed());
        }
        let _ = self.event_tx.send(WorkerEvent::Request { message, response_tx });
        Ok(())
    }

    /// Closes the router and its underlying message pipe. All outstanding
    /// and future requests resolve with a closed-connection error. Safe to
    /// call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.event_tx.send(WorkerEvent::Shutdown);
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker {
    kernel: Arc<dyn Kernel>,
    waiter: Arc<AsyncWaiter>,
    pipe: MessageHandle,
    responders: HashMap<u64, Sender<MessageReadResult>>,
    event_tx: Sender<WorkerEvent>,
    wait_id: Option<AsyncWaitId>,
}

impl Worker {
    fn run(mut self, event_rx: Receiver<WorkerEvent>) {
        let shutdown_error = self.run_loop(&event_rx);
        self.cancel_if_waiting();

        for (_, responder) in self.responders.drain() {
            let _ = responder.send(Err(shutdown_error));
        }
        // Anything still arriving after the loop gave up (e.g. a request
        // racing the close) also gets the shutdown error, never silence.
        while let Ok(event) = event_rx.try_recv() {
            if let WorkerEvent::Request { response_tx: Some(response_tx), .. } = event {
                let _ = response_tx.send(Err(shutdown_error));
            }
        }

        let result = self.pipe.close();
        if result != KernelResult::Ok {
            tracing::warn!(?result, "router pipe close returned non-ok result");
        }
    }

    /// Runs until the pipe fails, a message can't be parsed, or
    /// [`Router::close`] sends [`WorkerEvent::Shutdown`]. Returns the error
    /// that ended the loop.
    fn run_loop(&mut self, event_rx: &Receiver<WorkerEvent>) -> ConnectionError {
        loop {
            match event_rx.recv() {
                Ok(WorkerEvent::WaitCompleted(response)) => {
                    self.wait_id = None;
                    if response.result != KernelResult::Ok {
                        return ConnectionError::Kernel(response.result);
                    }
                }
                Ok(WorkerEvent::Request { message, response_tx }) => {
                    let request_id = message.header.request_id;
                    if let Err(err) = self.write(message) {
                        if let Some(response_tx) = response_tx {
                            let _ = response_tx.send(Err(err));
                        }
                        return err;
                    }
                    // Only register a responder after a successful write;
                    // request ids are assigned by the caller before the
                    // message is handed to us.
                    if let Some(response_tx) = response_tx {
                        self.responders.insert(request_id, response_tx);
                    }
                }
                Ok(WorkerEvent::Shutdown) => return ConnectionError::closed(),
                // Unreachable in practice: the worker always holds its own
                // sender clone. Treated the same as an explicit shutdown.
                Err(_) => return ConnectionError::closed(),
            }

            if let Err(err) = self.read_and_dispatch_outstanding() {
                return err;
            }
        }
    }

    fn write(&mut self, message: Message) -> Result<(), ConnectionError> {
        let raw_handles = message.handles.into_iter().map(|h| h.release_native()).collect();
        match self.kernel.write_message(self.pipe.raw(), &message.bytes, raw_handles) {
            KernelResult::Ok => Ok(()),
            result => Err(ConnectionError::Kernel(result)),
        }
    }

    /// Reads and dispatches messages until the pipe is empty or no
    /// responder remains waiting. Returns immediately without error if a
    /// wait is already outstanding.
    fn read_and_dispatch_outstanding(&mut self) -> Result<(), ConnectionError> {
        if self.wait_id.is_some() {
            return Ok(());
        }
        while !self.responders.is_empty() {
            match self.kernel.read_message(self.pipe.raw()) {
                Err(KernelResult::ShouldWait) => {
                    self.register_wait();
                    return Ok(());
                }
                Err(result) => return Err(ConnectionError::Kernel(result)),
                Ok((bytes, raw_handles)) => {
                    let handles = raw_handles
                        .into_iter()
                        .map(|raw| ipc_handle::UntypedHandle::new(self.kernel.clone(), raw))
                        .collect();
                    let message = ipc_wire::parse_message(bytes, handles).map_err(ConnectionError::Codec)?;
                    let id = message.header.request_id;
                    match self.responders.remove(&id) {
                        Some(responder) => {
                            let _ = responder.send(Ok(message));
                        }
                        // No caller is waiting on this id; the spec leaves
                        // unmatched responses to be dropped silently.
                        None => tracing::debug!(request_id = id, "dropping response with no matching responder"),
                    }
                }
            }
        }
        Ok(())
    }

    fn register_wait(&mut self) {
        let (id, rx) = self.waiter.async_wait(&self.pipe, Signals::READABLE);
        self.wait_id = Some(id);
        let event_tx = self.event_tx.clone();
        thread::spawn(move || {
            if let Ok(response) = rx.recv() {
                let _ = event_tx.send(WorkerEvent::WaitCompleted(response));
            }
        });
    }

    fn cancel_if_waiting(&mut self) {
        if let Some(id) = self.wait_id.take() {
            self.waiter.cancel_wait(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc_wire::{encode_message, Decoder, Encoder, MessageFlags, Payload};
    use std::time::Duration;

    struct Num(u32);

    impl Payload for Num {
        fn encode(&self, encoder: &mut Encoder) -> Result<(), ipc_wire::CodecError> {
            encoder.start_struct(4, 0);
            encoder.write_uint32(self.0)?;
            encoder.finish()
        }

        fn decode(decoder: &mut Decoder<'_>) -> Result<Self, ipc_wire::CodecError> {
            decoder.start_struct()?;
            let value = decoder.read_uint32()?;
            decoder.finish()?;
            Ok(Num(value))
        }
    }

    fn kernel() -> Arc<dyn Kernel> {
        Arc::new(ipc_kernel::MockKernel::new())
    }

    #[test]
    fn accept_delivers_fire_and_forget_message_to_peer() {
        let kernel = kernel();
        let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
        let (peer, side) = ipc_handle::create_message_pipe(&kernel);
        let router = Router::new(kernel.clone(), waiter, side);

        let message = encode_message(
            ipc_wire::MessageHeader { method_ordinal: 3, flags: MessageFlags::empty(), request_id: 0 },
            &Num(11),
        )
        .unwrap();
        router.accept(message).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            match kernel.read_message(peer.raw()) {
                Ok((bytes, handles)) => {
                    assert!(handles.is_empty());
                    let parsed = ipc_wire::parse_message(bytes, vec![]).unwrap();
                    assert_eq!(parsed.header.method_ordinal, 3);
                    break;
                }
                Err(KernelResult::ShouldWait) if std::time::Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(other) => panic!("unexpected read error: {other:?}"),
            }
        }
    }

    #[test]
    fn request_response_round_trips() {
        let kernel = kernel();
        let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
        let (peer, side) = ipc_handle::create_message_pipe(&kernel);
        let router = Router::new(kernel.clone(), waiter, side);

        let request = encode_message(
            ipc_wire::MessageHeader { method_ordinal: 1, flags: MessageFlags::EXPECTS_RESPONSE, request_id: 42 },
            &Num(5),
        )
        .unwrap();
        let rx = router.accept_with_response(request);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let (bytes, _) = loop {
            match kernel.read_message(peer.raw()) {
                Ok(pair) => break pair,
                Err(KernelResult::ShouldWait) if std::time::Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(other) => panic!("unexpected read error: {other:?}"),
            }
        };
        let inbound = ipc_wire::parse_message(bytes, vec![]).unwrap();
        assert_eq!(inbound.header.request_id, 42);

        let reply = encode_message(
            ipc_wire::MessageHeader { method_ordinal: 1, flags: MessageFlags::IS_RESPONSE, request_id: 42 },
            &Num(10),
        )
        .unwrap();
        kernel.write_message(peer.raw(), &reply.bytes, vec![]);

        let response = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        let value: Num = response.decode_payload().unwrap();
        assert_eq!(value.0, 10);
    }
}
