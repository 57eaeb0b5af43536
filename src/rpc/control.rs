//! Control channel: stdin delivery, terminal resize, VFS export, exit.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::error::RpcProtocolError;

use super::BOUNDED_WAIT;

/// Outcome of a worker-side [`ControlChannel::request_stdin`] wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinOutcome {
    /// Bytes the main thread delivered. Fewer bytes than requested is a
    /// valid, non-error outcome.
    Ready(Vec<u8>),
    /// The main thread asked for a VFS export before supplying stdin. The
    /// command word is left at `ExportVfs` for the worker to service via
    /// `export_requested`/`complete_export`.
    ExportRequested,
}

/// `COMMAND` header word states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Idle,
    StdinRequest,
    StdinReady,
    Exit,
    ExportVfs,
}

impl Command {
    const fn to_i32(self) -> i32 {
        match self {
            Command::Idle => 0,
            Command::StdinRequest => 2,
            Command::StdinReady => 3,
            Command::Exit => 4,
            Command::ExportVfs => 8,
        }
    }

    fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Command::Idle),
            2 => Some(Command::StdinRequest),
            3 => Some(Command::StdinReady),
            4 => Some(Command::Exit),
            8 => Some(Command::ExportVfs),
            _ => None,
        }
    }
}

/// View over the control buffer's header words and payload region.
///
/// Layout: `COMMAND, LENGTH, EXIT_CODE, COLS, ROWS,
/// PAYLOAD_WORD_INDEX` followed by the payload. `PAYLOAD_WORD_INDEX` names
/// where the payload starts in word units; this implementation fixes it at
/// construction time rather than re-deriving it from the header word on
/// every access, since the layout is static for the lifetime of a boot.
pub struct ControlChannel<'a> {
    command: &'a AtomicI32,
    length: &'a AtomicI32,
    exit_code: &'a AtomicI32,
    cols: &'a AtomicI32,
    rows: &'a AtomicI32,
    payload: &'a [AtomicU8],
}

/// Header word count before the payload region starts.
pub const HEADER_WORDS: usize = 6;

impl<'a> ControlChannel<'a> {
    pub fn new(header: &'a [AtomicI32; HEADER_WORDS], payload: &'a [AtomicU8]) -> Self {
        Self {
            command: &header[0],
            length: &header[1],
            exit_code: &header[2],
            cols: &header[3],
            rows: &header[4],
            payload,
        }
    }

    fn command(&self) -> Command {
        Command::from_i32(self.command.load(Ordering::Acquire)).unwrap_or(Command::Idle)
    }

    fn set_command(&self, cmd: Command) {
        self.command.store(cmd.to_i32(), Ordering::Release);
    }

    fn spin_wait_for<F: Fn(Command) -> bool>(
        &self,
        predicate: F,
        overall_timeout: Option<Duration>,
        tag: &'static str,
    ) -> Result<(), RpcProtocolError> {
        let deadline = overall_timeout.map(|d| Instant::now() + d);
        loop {
            if predicate(self.command()) {
                return Ok(());
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(RpcProtocolError::Timeout(tag));
                }
            }
            std::thread::sleep(BOUNDED_WAIT.min(Duration::from_millis(5)));
        }
    }

    // --- Worker side (runs on the emulator's dedicated blocking task) ---

    /// Requests up to `max_bytes` of stdin, blocking until the main thread
    /// either supplies bytes or asks for a VFS export. A pending
    /// `StdinRequest` is not itself interruptible by the main thread's
    /// `request_export`, so this wait also breaks on `ExportVfs` becoming
    /// visible — letting the worker service the export and retry the stdin
    /// request afterward, rather than hang with both sides waiting on each
    /// other.
    pub fn request_stdin(&self, max_bytes: i32) -> StdinOutcome {
        self.length.store(max_bytes, Ordering::Release);
        self.set_command(Command::StdinRequest);

        // No overall deadline here: the 100ms bound is a polling
        // granularity, not a request timeout. The request simply waits
        // until the main thread supplies bytes or asks for an export.
        let _ = self.spin_wait_for(
            |c| c == Command::StdinReady || c == Command::ExportVfs,
            None,
            "stdin_request",
        );

        if self.command() == Command::ExportVfs {
            return StdinOutcome::ExportRequested;
        }

        let actual_len = self.length.load(Ordering::Acquire).max(0) as usize;
        let mut out = Vec::with_capacity(actual_len);
        for i in 0..actual_len {
            out.push(self.payload[i].load(Ordering::Relaxed));
        }
        self.set_command(Command::Idle);
        StdinOutcome::Ready(out)
    }

    /// True if the main thread has requested a VFS export, without
    /// consuming the request (the worker services it between dispatch
    /// batches).
    pub fn export_requested(&self) -> bool {
        self.command() == Command::ExportVfs
    }

    /// Marks a requested export as serviced. The tar itself travels
    /// out-of-band (a transferable message), not through this channel.
    pub fn complete_export(&self) {
        self.set_command(Command::Idle);
    }

    /// Signals worker exit with the given code.
    pub fn signal_exit(&self, exit_code: i32) {
        self.exit_code.store(exit_code, Ordering::Release);
        self.set_command(Command::Exit);
    }

    // --- Main-thread side ---

    /// If a stdin request is pending, supplies up to the requested number of
    /// bytes (via `provide`, which receives the requested length and
    /// returns as many pending bytes as are available) and signals
    /// readiness. Returns `true` if a request was serviced.
    pub fn service_stdin_request(&self, provide: impl FnOnce(usize) -> Vec<u8>) -> bool {
        if self.command() != Command::StdinRequest {
            return false;
        }
        let requested = self.length.load(Ordering::Acquire).max(0) as usize;
        let bytes = provide(requested);
        let actual = bytes.len().min(requested);
        for (i, byte) in bytes.iter().take(actual).enumerate() {
            self.payload[i].store(*byte, Ordering::Relaxed);
        }
        self.length.store(actual as i32, Ordering::Release);
        self.set_command(Command::StdinReady);
        true
    }

    /// Requests a VFS export. Coalesced, latest-wins: calling this while a
    /// prior export is unacknowledged is a no-op, since the command word
    /// already reads `ExportVfs`. Also a no-op while a stdin request is
    /// pending — overwriting `StdinRequest` here would strand the worker's
    /// `request_stdin` wait, which only the worker observing `ExportVfs`
    /// itself is allowed to supersede.
    pub fn request_export(&self) -> bool {
        if matches!(self.command(), Command::ExportVfs | Command::StdinRequest) {
            return false;
        }
        self.set_command(Command::ExportVfs);
        true
    }

    /// Returns the exit code if the worker has signaled exit.
    pub fn take_exit(&self) -> Option<i32> {
        if self.command() == Command::Exit {
            Some(self.exit_code.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Reflects a terminal resize into the control header.
    pub fn set_size(&self, cols: i32, rows: i32) {
        self.cols.store(cols, Ordering::Release);
        self.rows.store(rows, Ordering::Release);
    }

    pub fn size(&self) -> (i32, i32) {
        (self.cols.load(Ordering::Acquire), self.rows.load(Ordering::Acquire))
    }
}

/// Allocates an owned control-channel backing store for tests and the
/// in-memory fakes.
pub fn new_backing_store(payload_len: usize) -> ([AtomicI32; HEADER_WORDS], Vec<AtomicU8>) {
    let header = [
        AtomicI32::new(0),
        AtomicI32::new(0),
        AtomicI32::new(0),
        AtomicI32::new(0),
        AtomicI32::new(0),
        AtomicI32::new(0),
    ];
    let payload = (0..payload_len).map(|_| AtomicU8::new(0)).collect();
    (header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn stdin_request_round_trip() {
        let (header, payload) = new_backing_store(4096);
        let channel = Arc::new((header, payload));

        let reader = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                let control = ControlChannel::new(&channel.0, &channel.1);
                control.request_stdin(4096)
            })
        };

        // Give the reader a moment to publish STDIN_REQUEST.
        thread::sleep(Duration::from_millis(20));
        {
            let control = ControlChannel::new(&channel.0, &channel.1);
            let serviced = control.service_stdin_request(|_requested| b"abc".to_vec());
            assert!(serviced);
        }

        let outcome = reader.join().unwrap();
        assert_eq!(outcome, StdinOutcome::Ready(b"abc".to_vec()));

        let control = ControlChannel::new(&channel.0, &channel.1);
        assert_eq!(control.command(), Command::Idle);
    }

    #[test]
    fn export_request_does_not_clobber_pending_stdin_request() {
        let (header, payload) = new_backing_store(16);
        let channel = Arc::new((header, payload));

        let reader = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                let control = ControlChannel::new(&channel.0, &channel.1);
                control.request_stdin(16)
            })
        };

        thread::sleep(Duration::from_millis(20));
        {
            let control = ControlChannel::new(&channel.0, &channel.1);
            assert_eq!(control.command(), Command::StdinRequest);
            assert!(!control.request_export());
            assert_eq!(control.command(), Command::StdinRequest);
        }

        // Once the pending request is serviced normally, export requests
        // are no longer blocked.
        {
            let control = ControlChannel::new(&channel.0, &channel.1);
            control.service_stdin_request(|_| b"x".to_vec());
        }
        let outcome = reader.join().unwrap();
        assert_eq!(outcome, StdinOutcome::Ready(b"x".to_vec()));

        let control = ControlChannel::new(&channel.0, &channel.1);
        assert!(control.request_export());
    }

    #[test]
    fn stdin_request_observes_export_instead_of_hanging() {
        let (header, payload) = new_backing_store(16);
        let channel = Arc::new((header, payload));

        let reader = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                let control = ControlChannel::new(&channel.0, &channel.1);
                control.request_stdin(16)
            })
        };

        thread::sleep(Duration::from_millis(20));
        {
            let control = ControlChannel::new(&channel.0, &channel.1);
            control.set_command(Command::ExportVfs);
        }

        let outcome = reader.join().unwrap();
        assert_eq!(outcome, StdinOutcome::ExportRequested);

        let control = ControlChannel::new(&channel.0, &channel.1);
        assert!(control.export_requested());
    }

    #[test]
    fn export_request_is_coalesced() {
        let (header, payload) = new_backing_store(16);
        let control = ControlChannel::new(&header, &payload);

        assert!(control.request_export());
        assert!(!control.request_export());
        assert!(control.export_requested());
        control.complete_export();
        assert!(!control.export_requested());
    }

    #[test]
    fn exit_round_trip() {
        let (header, payload) = new_backing_store(16);
        let control = ControlChannel::new(&header, &payload);

        assert!(control.take_exit().is_none());
        control.signal_exit(7);
        assert_eq!(control.take_exit(), Some(7));
    }
}
