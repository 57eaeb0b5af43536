//! Shared-memory buffer allocation for the control channel, the stdout
//! ring, and the network channel.
//!
//! Both sides of the control and network channels are plain reference
//! views (`ControlChannel<'a>`, `NetworkChannel<'a>`) over atomics that
//! must outlive them. In a browser the backing store is a
//! `SharedArrayBuffer` kept alive by both the main thread and the worker;
//! in this native re-implementation the equivalent is an `Arc`-owned
//! backing tuple that the Supervisor and the worker fake each clone and
//! construct short-lived channel views over.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU8};

use crate::ring::RING_CAPACITY;
use crate::rpc::control::HEADER_WORDS as CONTROL_HEADER_WORDS;
use crate::rpc::network::{DATA_CAPACITY, HEADER_WORDS as NETWORK_HEADER_WORDS};
use crate::rpc::control::ControlChannel;
use crate::rpc::network::NetworkChannel;
use crate::ring::{RingConsumer, RingProducer};

/// Default control-payload size. Large enough to satisfy a single
/// `STDIN_REQUEST` for a terminal-sized paste; only the stdout ring and
/// network data region have fixed sizes, this one is a host policy choice.
pub const CONTROL_PAYLOAD_CAPACITY: usize = 65_536;

type ControlBacking = ([AtomicI32; CONTROL_HEADER_WORDS], Vec<AtomicU8>);
type StdoutBacking = ([AtomicU32; 2], Vec<AtomicU8>);
type NetworkBacking = ([AtomicI32; NETWORK_HEADER_WORDS], Vec<AtomicU8>);

/// Owns the shared regions: the control buffer (header words plus
/// stdin/export/exit payload, plus the stdout ring) and the network
/// buffer. Cheap to clone — every field is an `Arc`.
#[derive(Clone)]
pub struct SharedBuffers {
    control: Arc<ControlBacking>,
    stdout: Arc<StdoutBacking>,
    network: Arc<NetworkBacking>,
}

impl SharedBuffers {
    /// Allocates a fresh set of buffers for one boot.
    pub fn allocate() -> Self {
        Self {
            control: Arc::new(crate::rpc::control::new_backing_store(
                CONTROL_PAYLOAD_CAPACITY,
            )),
            stdout: Arc::new(crate::ring::new_backing_store()),
            network: Arc::new(crate::rpc::network::new_backing_store(DATA_CAPACITY)),
        }
    }

    pub fn control(&self) -> ControlChannel<'_> {
        ControlChannel::new(&self.control.0, &self.control.1)
    }

    pub fn network(&self) -> NetworkChannel<'_> {
        NetworkChannel::new(&self.network.0, &self.network.1)
    }

    pub fn stdout_producer(&self) -> RingProducer<'_> {
        let (counters, data) = (&self.stdout.0, &self.stdout.1);
        debug_assert_eq!(data.len(), RING_CAPACITY);
        crate::ring::split(counters, data).0
    }

    pub fn stdout_consumer(&self) -> RingConsumer<'_> {
        let (counters, data) = (&self.stdout.0, &self.stdout.1);
        crate::ring::split(counters, data).1
    }
}
