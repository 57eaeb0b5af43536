//! Supervisor event fan-out.
//!
//! State transitions, auto-save outcomes, and recoverable errors reach
//! external observers through a `tokio::sync::broadcast` channel.

use super::state::SupervisorState;

/// Capacity of the broadcast channel. A slow subscriber that falls behind
/// this many events sees [`tokio::sync::broadcast::error::RecvError::Lagged`]
/// rather than stalling the Supervisor.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    StateChanged {
        from: SupervisorState,
        to: SupervisorState,
    },
    BootFailed {
        reason: String,
    },
    AutoSaveCompleted {
        session_id: String,
        delta_bytes: u64,
    },
    AutoSaveSkipped {
        reason: String,
    },
    TakeoverObserved,
    /// A recoverable error that stayed inside its owning component.
    Warning {
        component: &'static str,
        message: String,
    },
}
