//! Shared-memory RPC fabric.
//!
//! Two independent channels, each a fixed-size header of atomic words plus
//! a payload region: the control channel (stdin delivery, VFS export, exit)
//! and the network channel (socket operations). Both follow the same shape
//! — the worker writes fields, flips a state word, waits; the main thread
//! observes the state word, services the request, flips it back.

pub mod control;
pub mod network;

pub use control::{Command, ControlChannel};
pub use network::{Lock, NetworkChannel, Op};

use std::time::Duration;

/// Bounded-wait deadline used by both channels.
pub const BOUNDED_WAIT: Duration = Duration::from_millis(100);

/// Aggregate counters surfaced by the Supervisor's status view. These are
/// observable cross-cutting error-taxonomy counts without a dedicated
/// surface of their own; this crate centralizes them here since the
/// Supervisor already owns every other cross-cutting status surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct RpcMetrics {
    pub timeouts: u64,
    pub unknown_ops: u64,
    pub protocol_errors: u64,
}

impl RpcMetrics {
    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_unknown_op(&mut self) {
        self.unknown_ops += 1;
    }

    pub fn record_protocol_error(&mut self) {
        self.protocol_errors += 1;
    }
}
