//! Network channel: socket operation request/response.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::error::{errno, RpcProtocolError};

use super::BOUNDED_WAIT;

/// `LOCK` header word states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Lock {
    Free = 0,
    Request = 1,
    Response = 2,
}

impl Lock {
    fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Lock::Free),
            1 => Some(Lock::Request),
            2 => Some(Lock::Response),
            _ => None,
        }
    }
}

/// Socket operation codes carried in the `OP` header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Connect,
    Bind,
    Listen,
    Accept,
    Send,
    Recv,
    Close,
    HasData,
    HasPendingAccept,
    Shutdown,
}

impl Op {
    const fn to_i32(self) -> i32 {
        match self {
            Op::Create => 0,
            Op::Connect => 1,
            Op::Bind => 2,
            Op::Listen => 3,
            Op::Accept => 4,
            Op::Send => 5,
            Op::Recv => 6,
            Op::Close => 7,
            Op::HasData => 8,
            Op::HasPendingAccept => 9,
            Op::Shutdown => 10,
        }
    }

    fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Op::Create),
            1 => Some(Op::Connect),
            2 => Some(Op::Bind),
            3 => Some(Op::Listen),
            4 => Some(Op::Accept),
            5 => Some(Op::Send),
            6 => Some(Op::Recv),
            7 => Some(Op::Close),
            8 => Some(Op::HasData),
            9 => Some(Op::HasPendingAccept),
            10 => Some(Op::Shutdown),
            _ => None,
        }
    }
}

/// A fully decoded request, read from the header + payload by the main
/// thread once `LOCK == Request`.
#[derive(Debug, Clone)]
pub struct Request {
    pub op: Op,
    pub fd: i32,
    pub arg1: i32,
    pub arg2: i32,
    pub data: Vec<u8>,
}

/// A response written back by the main thread before flipping
/// `LOCK` to `Response`.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub result: i32,
    pub data: Vec<u8>,
}

/// Byte capacity of the network channel's data region.
pub const DATA_CAPACITY: usize = 65_472;

/// Header word count before the payload region starts (`LOCK, OP, FD,
/// ARG1, ARG2, RESULT, DATA_LEN`).
pub const HEADER_WORDS: usize = 7;

/// View over the network buffer's header words and payload region.
/// Layout: `LOCK, OP, FD, ARG1, ARG2, RESULT, DATA_LEN`.
pub struct NetworkChannel<'a> {
    lock: &'a AtomicI32,
    op: &'a AtomicI32,
    fd: &'a AtomicI32,
    arg1: &'a AtomicI32,
    arg2: &'a AtomicI32,
    result: &'a AtomicI32,
    data_len: &'a AtomicI32,
    data: &'a [AtomicU8],
}

impl<'a> NetworkChannel<'a> {
    pub fn new(header: &'a [AtomicI32; HEADER_WORDS], data: &'a [AtomicU8]) -> Self {
        Self {
            lock: &header[0],
            op: &header[1],
            fd: &header[2],
            arg1: &header[3],
            arg2: &header[4],
            result: &header[5],
            data_len: &header[6],
            data,
        }
    }

    fn lock_state(&self) -> Lock {
        Lock::from_i32(self.lock.load(Ordering::Acquire)).unwrap_or(Lock::Free)
    }

    fn set_lock(&self, lock: Lock) {
        self.lock.store(lock as i32, Ordering::Release);
    }

    // --- Worker side ---

    /// Issues a request and blocks (bounded-wait, re-checking every
    /// [`super::BOUNDED_WAIT`]) until the main thread responds or
    /// `overall_timeout` elapses.
    pub fn call(
        &self,
        op: Op,
        fd: i32,
        arg1: i32,
        arg2: i32,
        data: &[u8],
        overall_timeout: Option<Duration>,
    ) -> Result<Response, RpcProtocolError> {
        assert_eq!(
            self.lock_state(),
            Lock::Free,
            "at most one in-flight request per channel"
        );

        self.op.store(op.to_i32(), Ordering::Relaxed);
        self.fd.store(fd, Ordering::Relaxed);
        self.arg1.store(arg1, Ordering::Relaxed);
        self.arg2.store(arg2, Ordering::Relaxed);
        let len = data.len().min(DATA_CAPACITY);
        for (i, byte) in data[..len].iter().enumerate() {
            self.data[i].store(*byte, Ordering::Relaxed);
        }
        self.data_len.store(len as i32, Ordering::Relaxed);
        self.set_lock(Lock::Request);

        let deadline = overall_timeout.map(|d| Instant::now() + d);
        loop {
            if self.lock_state() == Lock::Response {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.set_lock(Lock::Free);
                    return Err(RpcProtocolError::Timeout("network_call"));
                }
            }
            std::thread::sleep(BOUNDED_WAIT.min(Duration::from_millis(1)));
        }

        let result = self.result.load(Ordering::Acquire);
        let resp_len = self.data_len.load(Ordering::Acquire).max(0) as usize;
        let mut resp_data = Vec::with_capacity(resp_len);
        for i in 0..resp_len {
            resp_data.push(self.data[i].load(Ordering::Relaxed));
        }
        self.set_lock(Lock::Free);
        Ok(Response {
            result,
            data: resp_data,
        })
    }

    // --- Main-thread side ---

    /// Polls the lock word (the main thread polls `LOCK` every ~1 ms).
    /// Returns the decoded request if one is pending; treats any
    /// poll while `LOCK != Request` as a no-op per the channel invariant.
    pub fn poll_request(&self) -> Option<Request> {
        if self.lock_state() != Lock::Request {
            return None;
        }
        let op_code = self.op.load(Ordering::Relaxed);
        let fd = self.fd.load(Ordering::Relaxed);
        let arg1 = self.arg1.load(Ordering::Relaxed);
        let arg2 = self.arg2.load(Ordering::Relaxed);
        let len = self.data_len.load(Ordering::Relaxed).max(0) as usize;
        let mut data = Vec::with_capacity(len);
        for i in 0..len {
            data.push(self.data[i].load(Ordering::Relaxed));
        }
        let Some(op) = Op::from_i32(op_code) else {
            // Unknown op: answer ENOSYS and release the lock ourselves,
            // since the caller never gets a `Request` to respond to.
            self.result.store(errno::ENOSYS, Ordering::Relaxed);
            self.data_len.store(0, Ordering::Relaxed);
            self.set_lock(Lock::Response);
            return None;
        };
        Some(Request {
            op,
            fd,
            arg1,
            arg2,
            data,
        })
    }

    /// Writes a response and releases the request to the worker.
    pub fn respond(&self, response: Response) {
        let len = response.data.len().min(DATA_CAPACITY);
        for (i, byte) in response.data[..len].iter().enumerate() {
            self.data[i].store(*byte, Ordering::Relaxed);
        }
        self.data_len.store(len as i32, Ordering::Relaxed);
        self.result.store(response.result, Ordering::Relaxed);
        self.set_lock(Lock::Response);
    }
}

/// Allocates an owned network-channel backing store for tests and fakes.
pub fn new_backing_store(data_len: usize) -> ([AtomicI32; HEADER_WORDS], Vec<AtomicU8>) {
    let header = [
        AtomicI32::new(0),
        AtomicI32::new(0),
        AtomicI32::new(0),
        AtomicI32::new(0),
        AtomicI32::new(0),
        AtomicI32::new(0),
        AtomicI32::new(0),
    ];
    let data = (0..data_len).map(|_| AtomicU8::new(0)).collect();
    (header, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_response_round_trip() {
        let (header, data) = new_backing_store(256);
        let channel = NetworkChannel::new(&header, &data);

        // Simulate the worker issuing a request on a second thread while the
        // main thread services it, without actually blocking this test on
        // real scheduling: issue the request fields directly, then poll.
        channel.op.store(Op::Send.to_i32(), Ordering::Relaxed);
        channel.fd.store(3, Ordering::Relaxed);
        channel.data_len.store(5, Ordering::Relaxed);
        for (i, b) in b"hello".iter().enumerate() {
            channel.data[i].store(*b, Ordering::Relaxed);
        }
        channel.set_lock(Lock::Request);

        let request = channel.poll_request().expect("request pending");
        assert_eq!(request.op, Op::Send);
        assert_eq!(request.fd, 3);
        assert_eq!(request.data, b"hello");

        channel.respond(Response {
            result: 5,
            data: vec![],
        });
        assert_eq!(channel.lock_state(), Lock::Response);
    }

    #[test]
    fn unknown_op_yields_enosys_and_releases_lock() {
        let (header, data) = new_backing_store(16);
        let channel = NetworkChannel::new(&header, &data);
        channel.op.store(999, Ordering::Relaxed);
        channel.set_lock(Lock::Request);

        assert!(channel.poll_request().is_none());
        assert_eq!(channel.lock_state(), Lock::Response);
        assert_eq!(channel.result.load(Ordering::Relaxed), errno::ENOSYS);
    }

    #[test]
    #[should_panic(expected = "at most one in-flight request")]
    fn call_panics_if_already_in_flight() {
        let (header, data) = new_backing_store(16);
        let channel = NetworkChannel::new(&header, &data);
        channel.set_lock(Lock::Request);
        let _ = channel.call(Op::HasData, 0, 0, 0, &[], Some(Duration::from_millis(10)));
    }
}
