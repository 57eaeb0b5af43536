//! Terminal collaborator seam: `write(bytes)`, `resize(rows, cols)`,
//! `onInput(cb)`.
//!
//! The terminal widget itself is out of scope; only its interface to the
//! Supervisor is modeled. `onInput`'s JS-style callback registration
//! becomes a plain `mpsc` channel here rather than a trait method taking a
//! boxed closure.

use parking_lot::Mutex;

/// Sink the Supervisor feeds drained stdout and size updates to.
pub trait TerminalSink: Send + Sync {
    fn write(&self, bytes: &[u8]);
    fn resize(&self, rows: i32, cols: i32);
}

/// In-memory terminal double. Tests read `output()` to assert what the
/// Supervisor wrote and pump `send_input` (or use `input_sender()`
/// directly) to simulate keystrokes.
#[cfg(any(test, feature = "test-internals"))]
#[derive(Default)]
pub struct FakeTerminal {
    output: Mutex<Vec<u8>>,
    size: Mutex<(i32, i32)>,
}

#[cfg(any(test, feature = "test-internals"))]
impl FakeTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }

    pub fn size(&self) -> (i32, i32) {
        *self.size.lock()
    }
}

#[cfg(any(test, feature = "test-internals"))]
impl TerminalSink for FakeTerminal {
    fn write(&self, bytes: &[u8]) {
        self.output.lock().extend_from_slice(bytes);
    }

    fn resize(&self, rows: i32, cols: i32) {
        *self.size.lock() = (rows, cols);
    }
}
