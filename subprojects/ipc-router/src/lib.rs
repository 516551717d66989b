//! Request/response plumbing over a message pipe: a blocking [`Connector`]
//! for servers that serve one request at a time, and a [`Router`] for
//! clients that correlate many outstanding calls by request id (spec §4.E,
//! §4.F). Ground: `mojo/public/go/bindings/{connector,router}.go`.

mod connector;
mod router;

pub use connector::{ConnectionError, Connector};
pub use router::{MessageReadResult, Router, RESPONDER_CAPACITY_HINT};
