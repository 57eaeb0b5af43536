//! Error taxonomy.
//!
//! Each component owns a `thiserror`-derived error enum; the Supervisor
//! aggregates them into [`HostError`] at the point where an error either
//! becomes fatal (propagates to the Supervisor's state machine) or is
//! reported as a recoverable [`crate::supervisor::events::SupervisorEvent`].

use thiserror::Error;

use crate::supervisor::state::SupervisorState;

/// Configuration problems. Always fatal at boot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("machine config is missing a rootfs url")]
    MissingRootfsUrl,
    #[error("machine id must be non-empty")]
    EmptyMachineId,
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Origin-private storage failures. Recoverable unless noted otherwise.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded, keeping prior delta for session {session_id}")]
    QuotaExceeded { session_id: String },
    #[error("io failure reading/writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("session record {0} not found")]
    RecordNotFound(String),
    #[error("serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Layer composition failures.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("failed to parse tar layer {layer}: {reason}")]
    Parse { layer: String, reason: String },
    #[error("base fingerprint mismatch: expected {expected}, found {found}")]
    FingerprintMismatch { expected: String, found: String },
}

/// Emulator worker failures. Always fatal; transitions the Supervisor to
/// `terminated`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker failed to become ready within the boot deadline")]
    BootTimeout,
    #[error("worker reported a fatal error: {message}")]
    Crashed { message: String },
    #[error("worker channel closed unexpectedly")]
    ChannelClosed,
    #[error("snapshot did not complete within its deadline")]
    SnapshotTimeout,
}

/// Shared-memory RPC protocol violations.
#[derive(Debug, Error)]
pub enum RpcProtocolError {
    #[error("unexpected lock state {found} while expecting {expected}")]
    UnexpectedLockState { expected: u32, found: u32 },
    #[error("unknown network operation code {0}")]
    UnknownOp(i32),
    #[error("bounded wait on {0} exceeded its deadline")]
    Timeout(&'static str),
}

/// WebTransport-session-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open webtransport session to {proxy_url}: {reason}")]
    OpenFailed { proxy_url: String, reason: String },
    #[error("session lost, reconnecting")]
    SessionLost,
}

/// Per-socket failures.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset")]
    ConnectionReset,
    #[error("send buffer full")]
    NoBufferSpace,
    #[error("no such open socket: fd {0}")]
    UnknownFd(i32),
}

/// Top-level error aggregate, constructed at the Supervisor boundary.
///
/// This is the type fatal errors are converted into before they reach a
/// caller outside this crate; recoverable errors are instead folded into a
/// `SupervisorEvent` and never become a `HostError`.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    RpcProtocol(#[from] RpcProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("machine {0} is already running in another tab")]
    AlreadyRunning(String),
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SupervisorState,
        to: SupervisorState,
    },
}

/// Negative-errno codes surfaced across the RPC/socket boundary. Named to
/// match their POSIX counterparts.
pub mod errno {
    pub const ENOSYS: i32 = -38;
    pub const EPROTO: i32 = -71;
    pub const EAGAIN: i32 = -11;
    pub const ECONNREFUSED: i32 = -111;
    pub const ECONNRESET: i32 = -104;
    pub const ENOBUFS: i32 = -105;
    pub const EGENERIC: i32 = -1;
}
