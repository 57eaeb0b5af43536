//! Socket handle state machine.

use std::collections::VecDeque;

/// `{guestFd, state, remoteAddr?, sendBuffer, recvQueue, eofSeen,
/// lastError?}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    New,
    Connecting,
    Open,
    HalfClosed,
    Closed,
}

/// Bound on `sendBuffer`.
pub const SEND_BUFFER_CAP: usize = 1024 * 1024;

#[derive(Debug)]
pub struct SocketHandle {
    pub guest_fd: i32,
    pub state: SocketState,
    pub remote_addr: Option<Vec<u8>>,
    pub send_buffer: Vec<u8>,
    pub recv_queue: VecDeque<Vec<u8>>,
    pub eof_seen: bool,
    pub last_error: Option<i32>,
    pub is_listener: bool,
}

impl SocketHandle {
    pub fn new(guest_fd: i32) -> Self {
        Self {
            guest_fd,
            state: SocketState::New,
            remote_addr: None,
            send_buffer: Vec::new(),
            recv_queue: VecDeque::new(),
            eof_seen: false,
            last_error: None,
            is_listener: false,
        }
    }

    /// Returns `true` (non-zero in RPC terms) iff the read queue is
    /// non-empty or EOF has been observed.
    pub fn has_data(&self) -> bool {
        !self.recv_queue.is_empty() || self.eof_seen
    }

    /// Dequeues up to `max_len` bytes. `Ok(0)` with no bytes queued and
    /// `eof_seen` means a clean EOF; an empty, non-EOF queue is reported by
    /// the caller as `-EAGAIN` rather than by this method.
    pub fn recv(&mut self, max_len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < max_len {
            let Some(front) = self.recv_queue.front_mut() else {
                break;
            };
            let take = (max_len - out.len()).min(front.len());
            out.extend(front.drain(..take));
            if front.is_empty() {
                self.recv_queue.pop_front();
            }
        }
        out
    }

    pub fn push_recv(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.recv_queue.push_back(bytes);
        }
    }

    /// Attempts to enqueue `bytes` onto the bounded send buffer, returning
    /// the number of bytes accepted.
    pub fn enqueue_send(&mut self, bytes: &[u8]) -> usize {
        let available = SEND_BUFFER_CAP.saturating_sub(self.send_buffer.len());
        let accepted = bytes.len().min(available);
        self.send_buffer.extend_from_slice(&bytes[..accepted]);
        accepted
    }

    pub fn take_send_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.send_buffer)
    }

    /// Transitions to `closed`, draining pending reads with EOF and
    /// recording the failure.
    pub fn fail(&mut self, errno: i32) {
        self.state = SocketState::Closed;
        self.eof_seen = true;
        self.last_error = Some(errno);
    }
}
