//! `Stub`: the server-side half of a generated interface (spec §4.G).
//! Ground: `mojo/public/go/bindings/stub.go`.

use std::sync::{Arc, Once};

use ipc_router::{ConnectionError, Connector};
use ipc_wire::{CodecError, Message};

/// A failure serving one request: either the underlying pipe broke, or the
/// inbound message failed to decode. Both close the stub (spec §7
/// "a corrupt peer is treated as a broken connection").
#[derive(Debug, thiserror::Error)]
pub enum StubError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Dispatches one decoded inbound [`Message`] to a typed implementation.
///
/// Generated per interface (spec §4.G, §9 "per-method dispatch"): an
/// ordinal-keyed dispatch table that decodes `message`'s payload according
/// to `message.header.method_ordinal`, calls the matching method on the
/// user's implementation, and — for methods that return a value — encodes
/// the reply as a fully formed response [`Message`] (`IsResponse` flag,
/// original `request_id`) ready for the stub to write back verbatim.
pub trait MessageReceiver: Send + Sync {
    /// Handles one inbound message. Returns `Ok(Some(response))` if the
    /// dispatched method expects a response, `Ok(None)` for a fire-and-forget
    /// call, or `Err` if the message failed to decode or named an unknown
    /// ordinal.
    fn accept(&self, message: Message) -> Result<Option<Message>, CodecError>;
}

/// Reads one message at a time off a [`Connector`] and dispatches it to a
/// [`MessageReceiver`], writing back whatever response the receiver
/// produces.
///
/// Safe to share across threads, but per spec §5 "within a stub,
/// `serve_request()` calls on the same stub are serialized" — callers
/// wanting concurrent dispatch should run multiple stubs (one per
/// connection), not call `serve_request` on the same stub from multiple
/// threads at once. `Stub` does not itself enforce this serialization
/// (the underlying `Connector` read path already permits only one
/// in-flight `read_message`, so a second concurrent caller simply queues
/// behind the first).
pub struct Stub<R> {
    connector: Arc<Connector>,
    receiver: R,
    close_once: Once,
}

impl<R: MessageReceiver> Stub<R> {
    /// Builds a stub reading from `connector` and dispatching to `receiver`.
    pub fn new(connector: Arc<Connector>, receiver: R) -> Self {
        Self { connector, receiver, close_once: Once::new() }
    }

    /// Serves one request: blocks until a message arrives, dispatches it,
    /// and writes back a response if one was produced. Closes the stub on
    /// any error before returning it.
    pub fn serve_request(&self) -> Result<(), StubError> {
        let message = match self.connector.read_message() {
            Ok(message) => message,
            // A malformed inbound message surfaces as a connector-level
            // codec error; translate it to the same `StubError::Codec` a
            // decode failure from `receiver.accept` below would produce,
            // rather than letting it read as a generic connection failure.
            Err(ConnectionError::Codec(err)) => {
                self.close();
                return Err(StubError::Codec(err));
            }
            Err(err) => {
                self.close();
                return Err(err.into());
            }
        };

        match self.receiver.accept(message) {
            Ok(Some(response)) => {
                if let Err(err) = self.connector.write_message(response) {
                    self.close();
                    return Err(err.into());
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                self.close();
                Err(err.into())
            }
        }
    }

    /// Closes the stub and its underlying message pipe. Interrupts any
    /// in-flight `serve_request` call. Idempotent.
    pub fn close(&self) {
        self.close_once.call_once(|| self.connector.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc_kernel::{Kernel, MockKernel};
    use ipc_waiter::AsyncWaiter;
    use ipc_wire::{encode_message, Decoder, Encoder, MessageFlags, MessageHeader, Payload};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Ping(u32);

    impl Payload for Ping {
        fn encode(&self, encoder: &mut Encoder) -> Result<(), CodecError> {
            encoder.start_struct(4, 0);
            encoder.write_uint32(self.0)?;
            encoder.finish()
        }

        fn decode(decoder: &mut Decoder<'_>) -> Result<Self, CodecError> {
            decoder.start_struct()?;
            let value = decoder.read_uint32()?;
            decoder.finish()?;
            Ok(Ping(value))
        }
    }

    const PING_ORDINAL: u32 = 1;

    struct Echo {
        calls: AtomicU32,
    }

    impl MessageReceiver for Echo {
        fn accept(&self, message: Message) -> Result<Option<Message>, CodecError> {
            assert_eq!(message.header.method_ordinal, PING_ORDINAL);
            self.calls.fetch_add(1, Ordering::Relaxed);
            let request_id = message.header.request_id;
            let expects_response = message.header.flags.contains(MessageFlags::EXPECTS_RESPONSE);
            let ping: Ping = message.decode_payload()?;
            if !expects_response {
                return Ok(None);
            }
            let header = MessageHeader {
                method_ordinal: PING_ORDINAL,
                flags: MessageFlags::IS_RESPONSE,
                request_id,
            };
            Ok(Some(encode_message(header, &Ping(ping.0 * 2))?))
        }
    }

    fn kernel() -> Arc<dyn Kernel> {
        Arc::new(MockKernel::new())
    }

    #[test]
    fn serve_request_dispatches_and_replies() {
        let kernel = kernel();
        let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
        let (client, server) = ipc_handle::create_message_pipe(&kernel);
        let connector = Arc::new(Connector::new(kernel.clone(), waiter, server));
        let stub = Stub::new(connector, Echo { calls: AtomicU32::new(0) });

        let header = MessageHeader { method_ordinal: PING_ORDINAL, flags: MessageFlags::EXPECTS_RESPONSE, request_id: 7 };
        let request = encode_message(header, &Ping(21)).unwrap();
        assert_eq!(kernel.write_message(client.raw(), &request.bytes, vec![]), ipc_kernel::KernelResult::Ok);

        stub.serve_request().unwrap();

        let (bytes, handles) = kernel.read_message(client.raw()).unwrap();
        let response = ipc_wire::parse_message(bytes, handles.into_iter().map(|raw| ipc_handle::UntypedHandle::new(kernel.clone(), raw)).collect()).unwrap();
        assert_eq!(response.header.request_id, 7);
        assert_eq!(response.header.flags, MessageFlags::IS_RESPONSE);
        let reply: Ping = response.decode_payload().unwrap();
        assert_eq!(reply.0, 42);
    }

    #[test]
    fn serve_request_closes_stub_on_malformed_message() {
        let kernel = kernel();
        let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
        let (client, server) = ipc_handle::create_message_pipe(&kernel);
        let connector = Arc::new(Connector::new(kernel.clone(), waiter, server));
        let stub = Stub::new(connector, Echo { calls: AtomicU32::new(0) });

        // Too short to even hold a data header.
        kernel.write_message(client.raw(), &[0u8; 2], vec![]);
        let err = stub.serve_request().unwrap_err();
        assert!(matches!(err, StubError::Codec(_)));

        // The stub closed its connector; a second call observes the pipe closed.
        let err = stub.serve_request().unwrap_err();
        assert!(matches!(err, StubError::Connection(e) if e.is_closed()));
    }
}
