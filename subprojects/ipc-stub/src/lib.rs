//! Stub/proxy adapters: the typed dispatch layer generated per interface,
//! sitting on top of the wire codec and the connector/router (spec §4.G).
//!
//! There is no interface-definition-language compiler in this core (spec
//! §1 "out of scope"), so the dispatch tables a real codegen pipeline
//! would emit are written by hand in this crate's tests and in any
//! downstream embedder; what lives here is the runtime support those
//! generated tables call into: [`Stub`] reads and replies on a
//! [`ipc_router::Connector`], [`ProxyBase`] writes through a
//! [`ipc_router::Router`] and correlates responses, and
//! [`InterfaceRequest`]/[`InterfacePointer`] name the two ends of an
//! interface's message pipe.

mod interface;
mod proxy;
mod stub;

pub use interface::{create_message_pipe_for_interface, InterfaceRequest, InterfacePointer};
pub use proxy::{recv_response, ProxyBase, ProxyError, RequestIdCounter};
pub use stub::{MessageReceiver, Stub, StubError};
