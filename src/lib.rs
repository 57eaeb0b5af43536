//! machinehost: host-side coordination core for a browser-embedded RISC-V
//! emulator platform.
//!
//! # Overview
//!
//! A guest operating system runs inside a dedicated-worker RISC-V
//! interpreter; this crate is the main-thread half of that arrangement. It
//! owns everything that has to live outside the worker's own realm: the
//! shared-memory RPC fabric the two sides rattle stdin/stdout/socket calls
//! across, the overlay filesystem that composes an immutable base image
//! with installed packages and a writable per-session delta, the bridge
//! that multiplexes guest sockets over a single WebTransport session, and
//! the supervisor state machine that boots, pauses, resumes, and tears the
//! whole thing down.
//!
//! # Module structure
//!
//! - [`ring`]: lock-free SPSC byte ring carrying guest stdout
//! - [`rpc`]: shared-memory request/response channels (`control`, `network`)
//! - [`overlay`]: tar composition, session deltas, and the sole persistence
//!   write path
//! - [`netbridge`]: guest socket multiplexing over a `Transport`
//! - [`supervisor`]: boot/pause/resume/terminate lifecycle and drain loop
//! - [`config`]: machine configuration and package manifests
//! - [`error`](mod@error): the crate's error taxonomy
//! - [`observability`]: structured logging setup
//!
//! # API stability
//!
//! This crate is pre-1.0; public items should be treated as unstable unless
//! otherwise noted.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod netbridge;
pub mod observability;
pub mod overlay;
pub mod ring;
pub mod rpc;
pub mod supervisor;

pub use config::MachineConfig;
pub use error::HostError;
pub use supervisor::{Supervisor, SupervisorEvent, SupervisorState};
