//! Emulator worker seam.
//!
//! The RISC-V interpreter itself is an external collaborator; this module
//! only types the messages crossing the boundary and ships the in-memory
//! fake the crate's own tests drive instead of a real wasm-bindgen worker.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::WorkerError;

use super::buffers::SharedBuffers;

/// `init { controlBuffer, stdoutBuffer, netBuffer, jitConfig?, options }`.
pub struct WorkerInit {
    pub buffers: SharedBuffers,
    pub jit_config: Option<serde_json::Value>,
    pub options: serde_json::Value,
}

/// `run { rootfsBytes (transferable), argv, env }`.
pub struct WorkerRun {
    pub rootfs_bytes: Vec<u8>,
    pub argv: Vec<String>,
    pub env: Vec<String>,
}

/// Messages the worker emits. `write`s to the stdout
/// ring are not modeled here — they go through [`SharedBuffers`] directly,
/// exactly as the browser worker bypasses postMessage for stdout.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Ready,
    VfsExport { tar_bytes: Vec<u8> },
    /// The register/memory blob half of a snapshot, answering
    /// [`WorkerHandle::request_register_snapshot`].
    RegisterSnapshot { bytes: Vec<u8> },
    JitStats(serde_json::Value),
    Error {
        message: String,
        stack: Option<String>,
    },
}

/// Lifecycle handle to the background emulator worker.
///
/// Every method is non-blocking: the Supervisor's async boot/drain code
/// polls [`WorkerHandle::take_event`] rather than awaiting the worker
/// directly, mirroring the real topology where the worker lives on its
/// own thread and only ever talks back via postMessage or the shared
/// buffers.
pub trait WorkerHandle: Send + Sync {
    fn init(&self, init: WorkerInit) -> Result<(), WorkerError>;
    fn run(&self, run: WorkerRun) -> Result<(), WorkerError>;
    fn resize(&self, cols: i32, rows: i32);
    fn write_file(&self, path: String, bytes: Vec<u8>) -> Result<(), WorkerError>;
    fn mount_local(&self, directory_handle: String) -> Result<(), WorkerError>;
    fn load_snapshot(&self, bytes: Vec<u8>) -> Result<(), WorkerError>;
    /// Requests a VFS export. The real worker
    /// observes `COMMAND = EXPORT_VFS` on the control buffer between
    /// dispatch batches; this seam lets the fake respond without actually
    /// polling shared memory from a second thread.
    fn request_export(&self);
    /// Requests the register/memory blob half of a snapshot.
    fn request_register_snapshot(&self);
    fn terminate(&self);
    /// Drains the next pending event, if any. Non-blocking.
    fn take_event(&self) -> Option<WorkerEvent>;
}

/// Deterministic in-process worker double.
///
/// Emits `Ready` as soon as `run` is called (no actual dispatch loop to
/// wait on), and answers `request_export`/`request_register_snapshot` by
/// invoking caller-supplied closures so a test can script exactly what the
/// "guest filesystem" looks like at export time.
#[cfg(any(test, feature = "test-internals"))]
pub struct FakeWorker {
    events: Mutex<VecDeque<WorkerEvent>>,
    export_provider: Mutex<Option<Box<dyn FnMut() -> Vec<u8> + Send>>>,
    snapshot_provider: Mutex<Option<Box<dyn FnMut() -> Vec<u8> + Send>>>,
    calls: Mutex<Vec<String>>,
    terminated: Mutex<bool>,
}

#[cfg(any(test, feature = "test-internals"))]
impl Default for FakeWorker {
    fn default() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            export_provider: Mutex::new(None),
            snapshot_provider: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            terminated: Mutex::new(false),
        }
    }
}

#[cfg(any(test, feature = "test-internals"))]
impl FakeWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the tar bytes a subsequent `request_export` will report.
    pub fn set_export_provider(&self, provider: impl FnMut() -> Vec<u8> + Send + 'static) {
        *self.export_provider.lock() = Some(Box::new(provider));
    }

    pub fn set_snapshot_provider(&self, provider: impl FnMut() -> Vec<u8> + Send + 'static) {
        *self.snapshot_provider.lock() = Some(Box::new(provider));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminated.lock()
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }
}

#[cfg(any(test, feature = "test-internals"))]
impl WorkerHandle for FakeWorker {
    fn init(&self, _init: WorkerInit) -> Result<(), WorkerError> {
        self.record("init");
        Ok(())
    }

    fn run(&self, _run: WorkerRun) -> Result<(), WorkerError> {
        self.record("run");
        self.events.lock().push_back(WorkerEvent::Ready);
        Ok(())
    }

    fn resize(&self, _cols: i32, _rows: i32) {
        self.record("resize");
    }

    fn write_file(&self, _path: String, _bytes: Vec<u8>) -> Result<(), WorkerError> {
        self.record("write_file");
        Ok(())
    }

    fn mount_local(&self, _directory_handle: String) -> Result<(), WorkerError> {
        self.record("mount_local");
        Ok(())
    }

    fn load_snapshot(&self, _bytes: Vec<u8>) -> Result<(), WorkerError> {
        self.record("load_snapshot");
        Ok(())
    }

    fn request_export(&self) {
        self.record("request_export");
        let mut provider = self.export_provider.lock();
        let tar_bytes = provider.as_mut().map_or_else(Vec::new, |f| f());
        self.events.lock().push_back(WorkerEvent::VfsExport { tar_bytes });
    }

    fn request_register_snapshot(&self) {
        self.record("request_register_snapshot");
        let mut provider = self.snapshot_provider.lock();
        let bytes = provider.as_mut().map_or_else(Vec::new, |f| f());
        self.events.lock().push_back(WorkerEvent::RegisterSnapshot { bytes });
    }

    fn terminate(&self) {
        *self.terminated.lock() = true;
    }

    fn take_event(&self) -> Option<WorkerEvent> {
        self.events.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_emits_ready() {
        let worker = FakeWorker::new();
        worker
            .run(WorkerRun {
                rootfs_bytes: vec![],
                argv: vec![],
                env: vec![],
            })
            .unwrap();
        assert!(matches!(worker.take_event(), Some(WorkerEvent::Ready)));
        assert!(worker.take_event().is_none());
    }

    #[test]
    fn export_provider_is_invoked_on_request() {
        let worker = FakeWorker::new();
        worker.set_export_provider(|| b"tar-bytes".to_vec());
        worker.request_export();
        match worker.take_event() {
            Some(WorkerEvent::VfsExport { tar_bytes }) => assert_eq!(tar_bytes, b"tar-bytes"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
