//! `Proxy` base: the client-side half of a generated interface (spec
//! §4.G). Ground: `mojo/public/go/bindings/util.go` (`Counter`) +
//! `router.go` (the router a generated proxy's methods write through).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use ipc_router::{ConnectionError, MessageReadResult, Router};
use ipc_wire::{CodecError, Payload};

/// A failure completing one proxy call: either the router closed before a
/// response arrived, or the response failed to decode. Surfaced to the
/// caller per spec §4.G ("stubs and proxies both surface decoding and
/// protocol errors ... to the caller").
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Issues unique, monotonically increasing request ids starting at 1.
///
/// Ground: Go's `counterImpl`/`NewCounter` in `util.go`; a single
/// `AtomicU64` plays the same role `sync/atomic.AddUint64` does there, one
/// instance shared by every generated method on a proxy (spec §4.G
/// "a thread-safe monotonic counter starting at 1").
#[derive(Default)]
pub struct RequestIdCounter {
    last: AtomicU64,
}

impl RequestIdCounter {
    pub fn new() -> Self {
        Self { last: AtomicU64::new(0) }
    }

    /// Returns the next unused id; each value is returned exactly once.
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Shared state every generated proxy's methods delegate to: a `Router` to
/// write requests through and correlate responses by id, plus this
/// proxy's own request id counter.
pub struct ProxyBase {
    router: Arc<Router>,
    request_ids: RequestIdCounter,
}

impl ProxyBase {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router, request_ids: RequestIdCounter::new() }
    }

    /// The next unique, nonzero request id for a response-bearing call.
    pub fn next_request_id(&self) -> u64 {
        self.request_ids.next()
    }

    /// Sends a fire-and-forget message (`header.request_id` must be zero).
    pub fn send(&self, message: ipc_wire::Message) -> Result<(), ConnectionError> {
        self.router.accept(message)
    }

    /// Sends a response-bearing message, returning a channel the caller
    /// blocks on for the correlated reply.
    pub fn send_with_response(&self, message: ipc_wire::Message) -> Receiver<MessageReadResult> {
        self.router.accept_with_response(message)
    }

    /// Closes the underlying router.
    pub fn close(&self) {
        self.router.close();
    }
}

/// Blocks on `rx` for the single reply a [`ProxyBase::send_with_response`]
/// call produces, then decodes its payload as `P`.
///
/// A caller wanting a timeout races `rx.recv_timeout` against its own
/// deadline and calls the waiter's `cancel_wait` directly instead (spec §5
/// "caller-level timeouts are constructed by racing the response future
/// against a timer"); this helper always blocks indefinitely.
pub fn recv_response<P: Payload>(rx: &Receiver<MessageReadResult>) -> Result<P, ProxyError> {
    let message = rx.recv().unwrap_or(Err(ConnectionError::closed()))?;
    Ok(message.decode_payload()?)
}
