//! Contract scenarios for `Router` (spec §8 scenarios 4 and 6, plus the
//! §4.F ordering guarantee and the unknown-request-id policy pinned in
//! §9). Ground: `mojo/go/tests/router_test.go`.

use std::sync::Arc;
use std::time::Duration;

use ipc_kernel::{Kernel, KernelResult, MockKernel};
use ipc_router::{ConnectionError, Router};
use ipc_waiter::AsyncWaiter;
use ipc_wire::{encode_message, CodecError, Decoder, Encoder, MessageFlags, MessageHeader, Payload};

struct Num(u32);

impl Payload for Num {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), CodecError> {
        encoder.start_struct(4, 0);
        encoder.write_uint32(self.0)?;
        encoder.finish()
    }

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, CodecError> {
        decoder.start_struct()?;
        let value = decoder.read_uint32()?;
        decoder.finish()?;
        Ok(Num(value))
    }
}

fn kernel() -> Arc<dyn Kernel> {
    Arc::new(MockKernel::new())
}

fn request(ordinal: u32, flags: MessageFlags, request_id: u64, value: u32) -> ipc_wire::Message {
    encode_message(MessageHeader { method_ordinal: ordinal, flags, request_id }, &Num(value)).unwrap()
}

/// Scenario 4: `accept` requires a zero request id.
#[test]
fn accept_rejects_nonzero_request_id() {
    let kernel = kernel();
    let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
    let (_peer, side) = ipc_handle::create_message_pipe(&kernel);
    let router = Router::new(kernel, waiter, side);

    let message = request(1, MessageFlags::empty(), 5, 0);
    let err = router.accept(message).unwrap_err();
    assert!(matches!(err, ConnectionError::Kernel(KernelResult::InvalidArgument)));
}

/// `accept_with_response` requires a nonzero request id.
#[test]
fn accept_with_response_rejects_zero_request_id() {
    let kernel = kernel();
    let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
    let (_peer, side) = ipc_handle::create_message_pipe(&kernel);
    let router = Router::new(kernel, waiter, side);

    let message = request(1, MessageFlags::EXPECTS_RESPONSE, 0, 0);
    let rx = router.accept_with_response(message);
    let err = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
    assert!(matches!(err, ConnectionError::Kernel(KernelResult::InvalidArgument)));
}

/// Spec §8 "Router ordering": the sequence of messages observed on the
/// peer equals the sequence of `accept` calls.
#[test]
fn messages_are_written_in_submission_order() {
    let kernel = kernel();
    let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
    let (peer, side) = ipc_handle::create_message_pipe(&kernel);
    let router = Router::new(kernel.clone(), waiter, side);

    for i in 0..20u32 {
        router.accept(request(1, MessageFlags::empty(), 0, i)).unwrap();
    }

    for i in 0..20u32 {
        let (bytes, handles) = read_blocking(&kernel, peer.raw());
        let message = ipc_wire::parse_message(bytes, handles).unwrap();
        let value: Num = message.decode_payload().unwrap();
        assert_eq!(value.0, i, "message {i} arrived out of order");
    }
}

fn read_blocking(kernel: &Arc<dyn Kernel>, handle: ipc_kernel::RawHandle) -> (Vec<u8>, Vec<ipc_handle::UntypedHandle>) {
    loop {
        match kernel.read_message(handle) {
            Ok((bytes, raw_handles)) => {
                let handles = raw_handles.into_iter().map(|raw| ipc_handle::UntypedHandle::new(kernel.clone(), raw)).collect();
                return (bytes, handles);
            }
            Err(KernelResult::ShouldWait) => std::thread::sleep(Duration::from_millis(1)),
            Err(other) => panic!("unexpected kernel read error: {other:?}"),
        }
    }
}

/// A response whose request id matches nothing outstanding is dropped
/// silently rather than closing the router (spec §9 open question,
/// resolved: drop).
#[test]
fn unmatched_response_is_dropped_silently() {
    let kernel = kernel();
    let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
    let (peer, side) = ipc_handle::create_message_pipe(&kernel);
    let router = Router::new(kernel.clone(), waiter, side);

    // A response racing in with no one waiting on its id.
    let stray = encode_message(
        MessageHeader { method_ordinal: 1, flags: MessageFlags::IS_RESPONSE, request_id: 999 },
        &Num(0),
    )
    .unwrap();
    kernel.write_message(peer.raw(), &stray.bytes, vec![]);

    // The router keeps working afterwards: a real request/response pair
    // still completes normally.
    let rx = router.accept_with_response(request(1, MessageFlags::EXPECTS_RESPONSE, 1, 7));
    let (bytes, handles) = read_blocking(&kernel, peer.raw());
    let inbound = ipc_wire::parse_message(bytes, handles).unwrap();
    assert_eq!(inbound.header.request_id, 1);

    let reply = encode_message(
        MessageHeader { method_ordinal: 1, flags: MessageFlags::IS_RESPONSE, request_id: 1 },
        &Num(14),
    )
    .unwrap();
    kernel.write_message(peer.raw(), &reply.bytes, vec![]);

    let response = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    let value: Num = response.decode_payload().unwrap();
    assert_eq!(value.0, 14);
}

/// Scenario 6: 50 concurrent `accept_with_response` calls to an idle peer,
/// then `close` — every future resolves with a closed error exactly once,
/// and the pipe is closed afterwards.
#[test]
fn close_resolves_every_pending_responder_with_closed_error() {
    let kernel = kernel();
    let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
    let (peer, side) = ipc_handle::create_message_pipe(&kernel);
    let side_raw = side.raw();
    let router = Router::new(kernel.clone(), waiter, side);

    let receivers: Vec<_> = (1..=50u64)
        .map(|id| router.accept_with_response(request(1, MessageFlags::EXPECTS_RESPONSE, id, id as u32)))
        .collect();

    router.close();

    for rx in receivers {
        let err = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
        assert!(err.is_closed(), "expected a closed-connection error, got {err:?}");
    }

    // The underlying pipe is now closed: the peer observes PeerClosed.
    let (result, state) = kernel.wait(peer.raw(), ipc_kernel::Signals::PEER_CLOSED, Some(Duration::from_secs(5)));
    assert_eq!(result, KernelResult::Ok);
    assert!(state.satisfied.is_peer_closed());
    assert_eq!(kernel.close(side_raw), KernelResult::InvalidArgument);
}

/// `close` is idempotent and safe to call from multiple points.
#[test]
fn close_is_idempotent() {
    let kernel = kernel();
    let waiter = Arc::new(AsyncWaiter::new(kernel.clone()));
    let (_peer, side) = ipc_handle::create_message_pipe(&kernel);
    let router = Router::new(kernel, waiter, side);
    router.close();
    router.close();

    let message = request(1, MessageFlags::empty(), 0, 0);
    let err = router.accept(message).unwrap_err();
    assert!(err.is_closed());
}
