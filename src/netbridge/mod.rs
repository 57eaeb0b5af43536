//! Network Bridge.
//!
//! Translates the guest's synchronous Berkeley-socket calls (carried over
//! the [`crate::rpc::network`] channel) into datagrams exchanged with a
//! remote TCP proxy over a single WebTransport session, preserving
//! per-connection ordering and back-pressure.

pub mod backoff;
pub mod bridge;
pub mod socket;
pub mod wire;

pub use backoff::ReconnectBackoff;
pub use bridge::{Dispatch, NetworkBridge, Transport, ACCEPT_BACKLOG_CAP};
#[cfg(any(test, feature = "test-internals"))]
pub use bridge::FakeTransport;
pub use socket::{SocketHandle, SocketState, SEND_BUFFER_CAP};
pub use wire::{Addr, Frame, FrameKind};
