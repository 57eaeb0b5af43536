//! Network Bridge: translates guest socket operations into WebTransport
//! datagrams against a remote proxy.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{errno, TransportError};

use super::backoff::ReconnectBackoff;
use super::socket::{SocketHandle, SocketState};
use super::wire::{Addr, Frame, FrameKind};

/// Bound on a listening socket's queued-but-unaccepted connections: a
/// `SOMAXCONN`-equivalent backlog of 128 frames.
pub const ACCEPT_BACKLOG_CAP: usize = 128;

/// Sends already-framed bytes as a single datagram. The wasm-bindgen
/// sibling crate implements this over `WebTransportDatagramDuplexStream`;
/// tests use [`FakeTransport`].
pub trait Transport: Send + Sync {
    fn send_datagram(&self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Captures outbound datagrams for assertions and lets tests inject
/// inbound ones, in place of a real WebTransport session.
#[cfg(any(test, feature = "test-internals"))]
#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<Vec<u8>>>,
    /// When set, every `send_datagram` call fails instead of recording.
    pub fail_sends: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-internals"))]
impl Transport for FakeTransport {
    fn send_datagram(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.fail_sends.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(TransportError::SessionLost);
        }
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }
}

enum ConnectOutcome {
    Ok,
    Err(i32),
}

struct PendingConnect {
    deadline: Instant,
    outcome: Option<ConnectOutcome>,
}

/// Owns every socket multiplexed over a single WebTransport session.
/// Singleton per bridge.
pub struct NetworkBridge {
    transport: Arc<dyn Transport>,
    sockets: Mutex<BTreeMap<i32, SocketHandle>>,
    listen_backlog: Mutex<BTreeMap<i32, VecDeque<Frame>>>,
    last_listen_fd: Mutex<Option<i32>>,
    pending_connects: Mutex<BTreeMap<i32, PendingConnect>>,
    backoff: Mutex<ReconnectBackoff>,
}

/// Outcome of dispatching one RPC request onto the bridge.
pub enum Dispatch {
    /// The response is ready now.
    Ready(crate::rpc::network::Response),
    /// The operation is in flight (currently only `connect`); poll
    /// [`NetworkBridge::poll_pending`] on subsequent drain ticks.
    Deferred,
}

impl NetworkBridge {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sockets: Mutex::new(BTreeMap::new()),
            listen_backlog: Mutex::new(BTreeMap::new()),
            last_listen_fd: Mutex::new(None),
            pending_connects: Mutex::new(BTreeMap::new()),
            backoff: Mutex::new(ReconnectBackoff::new()),
        }
    }

    /// Dispatches one decoded network-channel request.
    pub fn dispatch(
        &self,
        op: crate::rpc::network::Op,
        fd: i32,
        arg1: i32,
        _arg2: i32,
        data: &[u8],
        connect_timeout: Duration,
    ) -> Dispatch {
        use crate::rpc::network::{Op, Response};

        match op {
            Op::Create => {
                self.sockets.lock().insert(fd, SocketHandle::new(fd));
                Dispatch::Ready(Response {
                    result: 0,
                    data: vec![],
                })
            }
            Op::Connect => {
                let Some(addr) = Addr::decode(data) else {
                    return Dispatch::Ready(Response {
                        result: errno::EGENERIC,
                        data: vec![],
                    });
                };
                {
                    let mut sockets = self.sockets.lock();
                    let socket = sockets.entry(fd).or_insert_with(|| SocketHandle::new(fd));
                    socket.state = SocketState::Connecting;
                }
                let frame = Frame {
                    kind: FrameKind::Open,
                    fd,
                    payload: addr.encode(),
                };
                if self.transport.send_datagram(&frame.encode()).is_err() {
                    return Dispatch::Ready(Response {
                        result: errno::ECONNRESET,
                        data: vec![],
                    });
                }
                self.pending_connects.lock().insert(
                    fd,
                    PendingConnect {
                        deadline: Instant::now() + connect_timeout,
                        outcome: None,
                    },
                );
                Dispatch::Deferred
            }
            Op::Send => {
                let mut sockets = self.sockets.lock();
                let Some(socket) = sockets.get_mut(&fd) else {
                    return Dispatch::Ready(Response {
                        result: errno::EGENERIC,
                        data: vec![],
                    });
                };
                let accepted = socket.enqueue_send(data);
                if accepted == 0 && !data.is_empty() {
                    return Dispatch::Ready(Response {
                        result: errno::ENOBUFS,
                        data: vec![],
                    });
                }
                let to_send = socket.take_send_buffer();
                drop(sockets);
                let frame = Frame {
                    kind: FrameKind::Data,
                    fd,
                    payload: to_send,
                };
                if self.transport.send_datagram(&frame.encode()).is_err() {
                    if let Some(socket) = self.sockets.lock().get_mut(&fd) {
                        socket.fail(errno::ECONNRESET);
                    }
                    return Dispatch::Ready(Response {
                        result: errno::ECONNRESET,
                        data: vec![],
                    });
                }
                Dispatch::Ready(Response {
                    result: accepted as i32,
                    data: vec![],
                })
            }
            Op::Recv => {
                let mut sockets = self.sockets.lock();
                let Some(socket) = sockets.get_mut(&fd) else {
                    return Dispatch::Ready(Response {
                        result: errno::EGENERIC,
                        data: vec![],
                    });
                };
                let max_len = arg1.max(0) as usize;
                if socket.recv_queue.is_empty() {
                    if socket.eof_seen {
                        return Dispatch::Ready(Response {
                            result: 0,
                            data: vec![],
                        });
                    }
                    return Dispatch::Ready(Response {
                        result: errno::EAGAIN,
                        data: vec![],
                    });
                }
                let bytes = socket.recv(max_len);
                let len = bytes.len() as i32;
                Dispatch::Ready(Response {
                    result: len,
                    data: bytes,
                })
            }
            Op::HasData => {
                let sockets = self.sockets.lock();
                let has_data = sockets.get(&fd).is_some_and(SocketHandle::has_data);
                Dispatch::Ready(Response {
                    result: i32::from(has_data),
                    data: vec![],
                })
            }
            Op::HasPendingAccept => {
                let backlog = self.listen_backlog.lock();
                let pending = backlog.get(&fd).is_some_and(|q| !q.is_empty());
                Dispatch::Ready(Response {
                    result: i32::from(pending),
                    data: vec![],
                })
            }
            Op::Accept => {
                let mut backlog = self.listen_backlog.lock();
                let Some(queue) = backlog.get_mut(&fd) else {
                    return Dispatch::Ready(Response {
                        result: errno::EAGAIN,
                        data: vec![],
                    });
                };
                let Some(frame) = queue.pop_front() else {
                    return Dispatch::Ready(Response {
                        result: errno::EAGAIN,
                        data: vec![],
                    });
                };
                drop(backlog);
                let mut sockets = self.sockets.lock();
                let mut handle = SocketHandle::new(frame.fd);
                handle.state = SocketState::Open;
                handle.remote_addr = Some(frame.payload.clone());
                sockets.insert(frame.fd, handle);
                Dispatch::Ready(Response {
                    result: frame.fd,
                    data: frame.payload,
                })
            }
            Op::Close => {
                let frame = Frame {
                    kind: FrameKind::Close,
                    fd,
                    payload: vec![],
                };
                let _ = self.transport.send_datagram(&frame.encode());
                self.sockets.lock().remove(&fd);
                self.listen_backlog.lock().remove(&fd);
                Dispatch::Ready(Response {
                    result: 0,
                    data: vec![],
                })
            }
            Op::Shutdown => {
                let frame = Frame {
                    kind: FrameKind::Eof,
                    fd,
                    payload: vec![arg1 as u8],
                };
                let _ = self.transport.send_datagram(&frame.encode());
                if let Some(socket) = self.sockets.lock().get_mut(&fd) {
                    socket.state = SocketState::HalfClosed;
                }
                Dispatch::Ready(Response {
                    result: 0,
                    data: vec![],
                })
            }
            Op::Bind => {
                self.sockets
                    .lock()
                    .entry(fd)
                    .or_insert_with(|| SocketHandle::new(fd));
                Dispatch::Ready(Response {
                    result: 0,
                    data: vec![],
                })
            }
            Op::Listen => {
                {
                    let mut sockets = self.sockets.lock();
                    let socket = sockets.entry(fd).or_insert_with(|| SocketHandle::new(fd));
                    socket.is_listener = true;
                    socket.state = SocketState::Open;
                }
                self.listen_backlog.lock().entry(fd).or_default();
                *self.last_listen_fd.lock() = Some(fd);
                Dispatch::Ready(Response {
                    result: 0,
                    data: vec![],
                })
            }
        }
    }

    /// Polls an in-flight `connect` for resolution against its deadline.
    /// Returns `None` while still waiting.
    pub fn poll_pending(&self, fd: i32) -> Option<crate::rpc::network::Response> {
        use crate::rpc::network::Response;

        let mut pending = self.pending_connects.lock();
        let entry = pending.get_mut(&fd)?;
        if let Some(outcome) = entry.outcome.take() {
            pending.remove(&fd);
            return Some(match outcome {
                ConnectOutcome::Ok => {
                    if let Some(socket) = self.sockets.lock().get_mut(&fd) {
                        socket.state = SocketState::Open;
                    }
                    Response {
                        result: 0,
                        data: vec![],
                    }
                }
                ConnectOutcome::Err(code) => {
                    if let Some(socket) = self.sockets.lock().get_mut(&fd) {
                        socket.fail(code);
                    }
                    Response {
                        result: code,
                        data: vec![],
                    }
                }
            });
        }
        if Instant::now() >= entry.deadline {
            pending.remove(&fd);
            if let Some(socket) = self.sockets.lock().get_mut(&fd) {
                socket.fail(errno::ECONNREFUSED);
            }
            return Some(Response {
                result: errno::ECONNREFUSED,
                data: vec![],
            });
        }
        None
    }

    /// Feeds one inbound datagram from the transport into the bridge.
    pub fn on_datagram(&self, bytes: &[u8]) {
        let Ok(frame) = Frame::decode(bytes) else {
            return;
        };
        match frame.kind {
            FrameKind::OpenOk => {
                if let Some(pending) = self.pending_connects.lock().get_mut(&frame.fd) {
                    pending.outcome = Some(ConnectOutcome::Ok);
                }
            }
            FrameKind::OpenErr => {
                let code = frame
                    .payload
                    .first_chunk::<4>()
                    .map(|b| i32::from_be_bytes(*b))
                    .unwrap_or(errno::ECONNREFUSED);
                if let Some(pending) = self.pending_connects.lock().get_mut(&frame.fd) {
                    pending.outcome = Some(ConnectOutcome::Err(code));
                }
            }
            FrameKind::Data => {
                if let Some(socket) = self.sockets.lock().get_mut(&frame.fd) {
                    socket.push_recv(frame.payload);
                }
            }
            FrameKind::Eof => {
                if let Some(socket) = self.sockets.lock().get_mut(&frame.fd) {
                    socket.eof_seen = true;
                }
            }
            FrameKind::Close => {
                self.sockets.lock().remove(&frame.fd);
            }
            FrameKind::Err => {
                let code = frame
                    .payload
                    .first_chunk::<4>()
                    .map(|b| i32::from_be_bytes(*b))
                    .unwrap_or(errno::ECONNRESET);
                if let Some(socket) = self.sockets.lock().get_mut(&frame.fd) {
                    socket.fail(code);
                }
            }
            FrameKind::Open => self.on_inbound_open(frame),
        }
    }

    /// Server-accept path: the proxy originates `OPEN` frames for inbound
    /// connections, addressed to whichever fd the guest most recently
    /// called `listen` on. See `DESIGN.md` for why the last-listener fd is
    /// the routing key rather than address matching.
    fn on_inbound_open(&self, frame: Frame) {
        let Some(listen_fd) = *self.last_listen_fd.lock() else {
            self.reject_inbound_open(frame.fd);
            return;
        };
        let mut backlog = self.listen_backlog.lock();
        let queue = backlog.entry(listen_fd).or_default();
        if queue.len() >= ACCEPT_BACKLOG_CAP {
            drop(backlog);
            self.reject_inbound_open(frame.fd);
            return;
        }
        queue.push_back(frame);
    }

    fn reject_inbound_open(&self, fd: i32) {
        let reject = Frame {
            kind: FrameKind::OpenErr,
            fd,
            payload: errno::ECONNREFUSED.to_be_bytes().to_vec(),
        };
        let _ = self.transport.send_datagram(&reject.encode());
    }

    /// Marks the session lost and every currently open socket failed.
    /// Guest-visible sockets that were open are all failed; a lost
    /// session is never transparently migrated to a new one.
    pub fn on_session_lost(&self) -> Duration {
        let mut sockets = self.sockets.lock();
        for socket in sockets.values_mut() {
            if socket.state == SocketState::Open || socket.state == SocketState::Connecting {
                socket.fail(errno::ECONNRESET);
            }
        }
        self.backoff.lock().next_delay()
    }

    pub fn on_session_restored(&self) {
        self.backoff.lock().reset();
    }
}
