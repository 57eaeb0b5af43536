//! Supervisor: the main-thread coordination loop.
//!
//! Owns the machine's lifecycle state machine, drives the drain loop that
//! services the control and network RPC channels and the stdout ring, and
//! is the sole caller of [`crate::overlay::session::SessionStore::save`].

pub mod assets;
pub mod buffers;
pub mod events;
pub mod lock;
pub mod state;
pub mod terminal;
pub mod worker;

pub use assets::{AssetSource, StaticAssetSource};
pub use buffers::SharedBuffers;
pub use events::{SupervisorEvent, EVENT_CHANNEL_CAPACITY};
pub use lock::{AdvisoryLock, HolderId, InMemoryAdvisoryLock};
pub use state::SupervisorState;
pub use terminal::TerminalSink;
pub use worker::{WorkerEvent, WorkerHandle, WorkerInit, WorkerRun};
#[cfg(any(test, feature = "test-internals"))]
pub use terminal::FakeTerminal;
#[cfg(any(test, feature = "test-internals"))]
pub use worker::FakeWorker;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout};

use crate::config::MachineConfig;
use crate::error::{HostError, WorkerError};
use crate::overlay::session::{LoadedDelta, SessionRecord, SessionStore};
use crate::overlay::{
    self, apply_delta, compute_delta, fingerprint, merge_layer_stack, TarEntry, TarFile,
};
use crate::netbridge::NetworkBridge;

/// Upper bound on a single boot attempt.
const BOOT_DEADLINE: Duration = Duration::from_secs(120);
/// Upper bound on assembling a pause snapshot before forcing termination.
const SNAPSHOT_DEADLINE: Duration = Duration::from_secs(5);
/// Upper bound on a final export before a close/crash forces termination
/// anyway.
const TERMINATION_DEADLINE: Duration = Duration::from_secs(2);
/// Cadence of the drain loop's RPC/ring service pass. The main thread polls
/// the lock words every ~1 ms; this crate amortizes stdin/stdout/network
/// servicing into one tick rather than three separate pollers.
const DRAIN_INTERVAL: Duration = Duration::from_millis(4);

/// Bundle persisted across a pause.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub vfs_export: Vec<u8>,
    pub register_blob: Option<Vec<u8>>,
}

/// Coordinates one machine's boot/run/pause/resume/terminate lifecycle.
pub struct Supervisor {
    config: MachineConfig,
    holder_id: HolderId,
    lock: Arc<dyn AdvisoryLock>,
    assets: Arc<dyn AssetSource>,
    session_store: SessionStore,
    worker: Arc<dyn WorkerHandle>,
    terminal: Arc<dyn TerminalSink>,
    network_bridge: Arc<NetworkBridge>,
    events_tx: broadcast::Sender<SupervisorEvent>,

    state: Mutex<SupervisorState>,
    buffers: Mutex<Option<SharedBuffers>>,
    composed_base: Mutex<Vec<TarEntry>>,
    composed_fingerprint: Mutex<String>,
    session_record: Mutex<Option<SessionRecord>>,
    snapshot: Mutex<Option<Snapshot>>,
    pending_connect_fd: Mutex<Option<i32>>,

    input_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    pending_stdin: Mutex<VecDeque<u8>>,
}

impl Supervisor {
    /// Builds a Supervisor and the keystroke channel its caller feeds.
    /// The terminal collaborator's `onInput` is modeled as an external
    /// `mpsc` sender rather than a callback; see `supervisor::terminal`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MachineConfig,
        lock: Arc<dyn AdvisoryLock>,
        assets: Arc<dyn AssetSource>,
        backing: Arc<dyn crate::overlay::store::PersistentStore>,
        worker: Arc<dyn WorkerHandle>,
        terminal: Arc<dyn TerminalSink>,
        network_bridge: Arc<NetworkBridge>,
    ) -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let supervisor = Arc::new(Self {
            config,
            holder_id: HolderId::new(),
            lock,
            assets,
            session_store: SessionStore::new(backing),
            worker,
            terminal,
            network_bridge,
            events_tx,
            state: Mutex::new(SupervisorState::Idle),
            buffers: Mutex::new(None),
            composed_base: Mutex::new(Vec::new()),
            composed_fingerprint: Mutex::new(String::new()),
            session_record: Mutex::new(None),
            snapshot: Mutex::new(None),
            pending_connect_fd: Mutex::new(None),
            input_rx: Mutex::new(input_rx),
            pending_stdin: Mutex::new(VecDeque::new()),
        });
        (supervisor, input_tx)
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events_tx.subscribe()
    }

    fn lock_name(&self) -> String {
        format!("machine:{}", self.config.id)
    }

    fn transition(&self, next: SupervisorState) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(HostError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        let from = *state;
        *state = next;
        drop(state);
        let _ = self
            .events_tx
            .send(SupervisorEvent::StateChanged { from, to: next });
        Ok(())
    }

    /// Forces a transition unconditionally, used on the terminal edges
    /// (fatal errors, termination) where there is nothing left to refuse.
    fn transition_force(&self, next: SupervisorState) {
        let mut state = self.state.lock();
        let from = *state;
        *state = next;
        drop(state);
        let _ = self
            .events_tx
            .send(SupervisorEvent::StateChanged { from, to: next });
    }

    // --- Boot ---

    /// Runs the full boot sequence: acquire the advisory lock, compose the
    /// root filesystem, spawn the worker, and start the drain loop.
    pub async fn boot(self: &Arc<Self>) -> Result<(), HostError> {
        let lock_name = self.lock_name();
        if !self.lock.try_acquire(&lock_name, self.holder_id) {
            return Err(HostError::AlreadyRunning(self.config.id.clone()));
        }
        self.transition(SupervisorState::Booting)?;

        match timeout(BOOT_DEADLINE, self.boot_steps()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.fail_boot(err).await
            }
            Err(_) => self.fail_boot(HostError::Worker(WorkerError::BootTimeout)).await,
        }
    }

    async fn fail_boot(&self, err: HostError) -> Result<(), HostError> {
        self.lock.release(&self.lock_name(), self.holder_id);
        let _ = self.events_tx.send(SupervisorEvent::BootFailed {
            reason: err.to_string(),
        });
        self.transition_force(SupervisorState::Terminated);
        Err(err)
    }

    async fn boot_steps(self: &Arc<Self>) -> Result<(), HostError> {
        // Step 2: read session record; load base, packages, delta.
        let base_bytes = overlay::maybe_decompress(self.assets.fetch_base(&self.config.rootfs_url)?)?;
        let base_entries = TarFile::parse_named(base_bytes.clone(), "base")?.into_entries();
        let base_fp = fingerprint::base_fingerprint(&base_bytes);

        let mut package_layers = Vec::with_capacity(self.config.packages.len());
        for package_id in &self.config.packages {
            let package_bytes = overlay::maybe_decompress(self.assets.fetch_package(package_id)?)?;
            package_layers.push(TarFile::parse_named(package_bytes, package_id)?.into_entries());
        }
        let composed_fp = fingerprint::composed_fingerprint(&base_fp, &self.config.packages);

        let record = self
            .session_store
            .load_record(&self.config.id)?
            .unwrap_or_else(|| {
                SessionRecord::new(&self.config.id, &self.config.name, composed_fp.clone())
            });

        let delta = match self
            .session_store
            .load_delta(&self.config.id, &composed_fp)?
        {
            LoadedDelta::Absent => None,
            LoadedDelta::Valid(delta) => Some(delta),
            LoadedDelta::Quarantined { reason } => {
                let _ = self
                    .events_tx
                    .send(SupervisorEvent::Warning { component: "overlay", message: reason });
                None
            }
        };

        // Step 3: compose the boot image.
        let composed_base = merge_layer_stack(&base_entries, &package_layers);
        let boot_image = match &delta {
            Some(delta) => apply_delta(&composed_base, delta),
            None => composed_base.clone(),
        };

        *self.composed_base.lock() = composed_base;
        *self.composed_fingerprint.lock() = composed_fp;
        *self.session_record.lock() = Some(record);

        // Step 4: allocate shared buffers.
        let buffers = SharedBuffers::allocate();

        // Step 5: spawn the worker, send init, await ready.
        self.worker
            .init(WorkerInit {
                buffers: buffers.clone(),
                jit_config: None,
                options: serde_json::Value::Null,
            })
            .map_err(HostError::Worker)?;
        self.await_worker_ready().await?;

        // Step 6: send the composed image and argv/env.
        let tar_bytes = TarFile::encode(&boot_image);
        self.worker
            .run(WorkerRun {
                rootfs_bytes: tar_bytes,
                argv: self.config.entrypoint.clone(),
                env: self.config.env.clone(),
            })
            .map_err(HostError::Worker)?;

        *self.buffers.lock() = Some(buffers);

        // Step 7: enter running state and start the drain loop.
        self.transition(SupervisorState::Running)?;
        self.spawn_drain_loop();
        Ok(())
    }

    async fn await_worker_ready(&self) -> Result<(), HostError> {
        loop {
            match self.worker.take_event() {
                Some(WorkerEvent::Ready) => return Ok(()),
                Some(WorkerEvent::Error { message, .. }) => {
                    return Err(HostError::Worker(WorkerError::Crashed { message }));
                }
                Some(_) => continue,
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    }

    // --- Pause / resume ---

    /// Requests a snapshot (VFS export plus register/memory blob) and
    /// terminates the worker, keeping the snapshot in memory for a later
    /// `resume`.
    pub async fn pause(&self) -> Result<(), HostError> {
        self.transition(SupervisorState::Pausing)?;
        let buffers = self
            .buffers
            .lock()
            .clone()
            .ok_or(HostError::Worker(WorkerError::ChannelClosed))?;

        buffers.control().request_export();
        self.worker.request_export();
        self.worker.request_register_snapshot();

        match timeout(SNAPSHOT_DEADLINE, self.await_snapshot(&buffers)).await {
            Ok(Ok(snapshot)) => {
                *self.snapshot.lock() = Some(snapshot);
                self.worker.terminate();
                self.transition(SupervisorState::Paused)?;
                Ok(())
            }
            Ok(Err(err)) => self.force_terminate_on_pause_failure(err),
            Err(_) => {
                self.force_terminate_on_pause_failure(HostError::Worker(WorkerError::SnapshotTimeout))
            }
        }
    }

    fn force_terminate_on_pause_failure(&self, err: HostError) -> Result<(), HostError> {
        // A snapshot that can't be assembled in time is treated as lost
        // rather than left half-built.
        self.worker.terminate();
        self.transition_force(SupervisorState::Terminated);
        self.lock.release(&self.lock_name(), self.holder_id);
        Err(err)
    }

    async fn await_snapshot(&self, buffers: &SharedBuffers) -> Result<Snapshot, HostError> {
        let mut vfs_export = None;
        let mut register_blob = None;
        loop {
            if vfs_export.is_some() {
                break;
            }
            match self.worker.take_event() {
                Some(WorkerEvent::VfsExport { tar_bytes }) => {
                    buffers.control().complete_export();
                    vfs_export = Some(tar_bytes);
                }
                Some(WorkerEvent::RegisterSnapshot { bytes }) => {
                    register_blob = Some(bytes);
                }
                Some(WorkerEvent::Error { message, .. }) => {
                    return Err(HostError::Worker(WorkerError::Crashed { message }));
                }
                Some(_) => {}
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        let record = self
            .session_record
            .lock()
            .clone()
            .expect("session record is set by the time a boot completes");
        let fingerprint = self.composed_fingerprint.lock().clone();
        // A storage failure here is recoverable (already reported as a
        // `SupervisorEvent::Warning` by `persist_vfs_export`): the pause
        // still completes and the in-memory snapshot is kept for `resume`,
        // matching the auto-save and final-export paths, which also log and
        // continue rather than fail the whole lifecycle over it.
        let _ = self.persist_vfs_export(record, &fingerprint, vfs_export.clone().unwrap_or_default());
        Ok(Snapshot {
            vfs_export: vfs_export.unwrap_or_default(),
            register_blob,
        })
    }

    /// Resumes a paused machine: a fresh worker, the original composed tar
    /// plus the saved snapshot's delta, and the register blob loaded back
    /// in before `run`.
    pub async fn resume(&self) -> Result<(), HostError> {
        let snapshot = self
            .snapshot
            .lock()
            .take()
            .ok_or_else(|| HostError::Worker(WorkerError::ChannelClosed))?;

        let buffers = SharedBuffers::allocate();
        self.worker
            .init(WorkerInit {
                buffers: buffers.clone(),
                jit_config: None,
                options: serde_json::Value::Null,
            })
            .map_err(HostError::Worker)?;
        self.await_worker_ready().await?;

        if let Some(register_blob) = snapshot.register_blob {
            self.worker
                .load_snapshot(register_blob)
                .map_err(HostError::Worker)?;
        }

        let composed_base = self.composed_base.lock().clone();
        let fingerprint = self.composed_fingerprint.lock().clone();
        let delta = match self.session_store.load_delta(&self.config.id, &fingerprint)? {
            LoadedDelta::Valid(delta) => Some(delta),
            LoadedDelta::Absent => None,
            LoadedDelta::Quarantined { reason } => {
                let _ = self
                    .events_tx
                    .send(SupervisorEvent::Warning { component: "overlay", message: reason });
                None
            }
        };
        let boot_image = match &delta {
            Some(delta) => apply_delta(&composed_base, delta),
            None => composed_base,
        };

        self.worker
            .run(WorkerRun {
                rootfs_bytes: TarFile::encode(&boot_image),
                argv: self.config.entrypoint.clone(),
                env: self.config.env.clone(),
            })
            .map_err(HostError::Worker)?;

        *self.buffers.lock() = Some(buffers);
        self.transition(SupervisorState::Running)?;
        Ok(())
    }

    // --- Termination ---

    /// Requests a final export, waits up to the termination deadline, then
    /// tears the worker down unconditionally and releases the advisory
    /// lock.
    pub async fn terminate(&self) -> Result<(), HostError> {
        if self.state() == SupervisorState::Terminated {
            return Ok(());
        }
        if let Some(buffers) = self.buffers.lock().clone() {
            buffers.control().request_export();
            self.worker.request_export();
            let _ = timeout(TERMINATION_DEADLINE, self.await_final_export(&buffers)).await;
        }
        self.worker.terminate();
        self.transition_force(SupervisorState::Terminated);
        self.lock.release(&self.lock_name(), self.holder_id);
        Ok(())
    }

    async fn await_final_export(&self, buffers: &SharedBuffers) {
        loop {
            match self.worker.take_event() {
                Some(WorkerEvent::VfsExport { tar_bytes }) => {
                    buffers.control().complete_export();
                    let record = self.session_record.lock().clone();
                    let fingerprint = self.composed_fingerprint.lock().clone();
                    if let Some(record) = record {
                        let _ = self.persist_vfs_export(record, &fingerprint, tar_bytes);
                    }
                    return;
                }
                Some(_) => {}
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    }

    // --- Persistence (the sole write path) ---

    fn persist_vfs_export(
        &self,
        record: SessionRecord,
        fingerprint: &str,
        tar_bytes: Vec<u8>,
    ) -> Result<(), HostError> {
        let tar = TarFile::parse_named(bytes::Bytes::from(tar_bytes), "export")?;
        let composed_base = self.composed_base.lock().clone();
        let delta = compute_delta(&composed_base, tar.entries());
        match self.session_store.save(record, fingerprint, &delta) {
            Ok(saved) => {
                let _ = self.events_tx.send(SupervisorEvent::AutoSaveCompleted {
                    session_id: saved.id.clone(),
                    delta_bytes: saved.delta_bytes,
                });
                *self.session_record.lock() = Some(saved);
                Ok(())
            }
            Err(err) => {
                let _ = self.events_tx.send(SupervisorEvent::Warning {
                    component: "overlay",
                    message: err.to_string(),
                });
                Err(HostError::Storage(err))
            }
        }
    }

    // --- Drain loop ---

    fn spawn_drain_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut drain_ticker = interval(DRAIN_INTERVAL);
            let mut autosave_ticker = interval(this.config.auto_save_interval());
            loop {
                if this.state() != SupervisorState::Running {
                    break;
                }
                tokio::select! {
                    _ = drain_ticker.tick() => {
                        if this.drain_tick() {
                            let _ = this.terminate().await;
                            break;
                        }
                    }
                    _ = autosave_ticker.tick() => this.autosave_tick(),
                }
            }
        });
    }

    fn pump_input(&self) {
        let mut rx = self.input_rx.lock();
        let mut pending = self.pending_stdin.lock();
        while let Ok(bytes) = rx.try_recv() {
            pending.extend(bytes);
        }
    }

    /// Services stdin/stdout/exit/network for one tick. Returns `true` if
    /// the worker signaled exit and the drain loop should stop.
    fn drain_tick(&self) -> bool {
        let Some(buffers) = self.buffers.lock().clone() else {
            return false;
        };

        let mut out = Vec::new();
        buffers.stdout_consumer().drain_into(&mut out);
        if !out.is_empty() {
            self.terminal.write(&out);
        }

        self.pump_input();
        let control = buffers.control();
        {
            let mut pending = self.pending_stdin.lock();
            control.service_stdin_request(|requested| {
                let take = requested.min(pending.len());
                pending.drain(..take).collect()
            });
        }

        if let Some(exit_code) = control.take_exit() {
            let _ = self.events_tx.send(SupervisorEvent::Warning {
                component: "worker",
                message: format!("worker exited with code {exit_code}"),
            });
            return true;
        }

        self.service_network(&buffers);

        while let Some(event) = self.worker.take_event() {
            self.handle_worker_event(&buffers, event);
        }

        false
    }

    fn service_network(&self, buffers: &SharedBuffers) {
        let network = buffers.network();
        let mut pending_fd = self.pending_connect_fd.lock();
        if let Some(fd) = *pending_fd {
            if let Some(response) = self.network_bridge.poll_pending(fd) {
                network.respond(response);
                *pending_fd = None;
            }
            return;
        }
        drop(pending_fd);

        let Some(request) = network.poll_request() else {
            return;
        };
        match self.network_bridge.dispatch(
            request.op,
            request.fd,
            request.arg1,
            request.arg2,
            &request.data,
            self.config.connect_timeout(),
        ) {
            crate::netbridge::Dispatch::Ready(response) => network.respond(response),
            crate::netbridge::Dispatch::Deferred => {
                *self.pending_connect_fd.lock() = Some(request.fd);
            }
        }
    }

    fn handle_worker_event(&self, buffers: &SharedBuffers, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready | WorkerEvent::RegisterSnapshot { .. } | WorkerEvent::JitStats(_) => {}
            WorkerEvent::VfsExport { tar_bytes } => {
                let record = self.session_record.lock().clone();
                let fingerprint = self.composed_fingerprint.lock().clone();
                buffers.control().complete_export();
                if let Some(record) = record {
                    if let Err(err) = self.persist_vfs_export(record, &fingerprint, tar_bytes) {
                        let _ = self.events_tx.send(SupervisorEvent::Warning {
                            component: "overlay",
                            message: err.to_string(),
                        });
                    }
                }
            }
            WorkerEvent::Error { message, .. } => {
                let _ = self
                    .events_tx
                    .send(SupervisorEvent::Warning { component: "worker", message });
            }
        }
    }

    /// Auto-save cadence. A request while a
    /// prior one is unacknowledged is coalesced (latest-wins) by
    /// [`crate::rpc::control::ControlChannel::request_export`] itself.
    fn autosave_tick(&self) {
        let Some(buffers) = self.buffers.lock().clone() else {
            return;
        };
        let control = buffers.control();
        if control.export_requested() {
            let _ = self.events_tx.send(SupervisorEvent::AutoSaveSkipped {
                reason: "prior export unacknowledged".to_string(),
            });
            return;
        }
        if control.request_export() {
            self.worker.request_export();
        }
    }

    /// Observes a stolen advisory lock and forces termination if this
    /// Supervisor is no longer the holder.
    pub async fn check_lock_ownership(&self) -> bool {
        if self.lock.is_held_by(&self.lock_name(), self.holder_id) {
            return true;
        }
        let _ = self.events_tx.send(SupervisorEvent::TakeoverObserved);
        let _ = self.terminate().await;
        false
    }

    /// Forwards a terminal resize to the control buffer and the worker.
    pub fn resize(&self, cols: i32, rows: i32) {
        if let Some(buffers) = self.buffers.lock().clone() {
            buffers.control().set_size(cols, rows);
        }
        self.worker.resize(cols, rows);
        self.terminal.resize(rows, cols);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::store::InMemoryStore;
    use crate::overlay::tarfile::{EntryKind, TarEntry as Entry};
    use crate::netbridge::FakeTransport;
    use bytes::Bytes;

    fn tar_with(path: &str, content: &str) -> Vec<u8> {
        let entries = vec![Entry {
            path: path.to_string(),
            mode: 0o644,
            mtime: 1,
            kind: EntryKind::File,
            content: Bytes::copy_from_slice(content.as_bytes()),
        }];
        TarFile::encode(&entries)
    }

    fn make_supervisor() -> (Arc<Supervisor>, mpsc::UnboundedSender<Vec<u8>>, Arc<FakeWorker>) {
        make_supervisor_with_lock(Arc::new(InMemoryAdvisoryLock::new()))
    }

    fn make_supervisor_with_lock(
        lock: Arc<InMemoryAdvisoryLock>,
    ) -> (Arc<Supervisor>, mpsc::UnboundedSender<Vec<u8>>, Arc<FakeWorker>) {
        make_supervisor_with_lock_and_store(lock, Arc::new(InMemoryStore::new()))
    }

    fn make_supervisor_with_lock_and_store(
        lock: Arc<InMemoryAdvisoryLock>,
        store: Arc<InMemoryStore>,
    ) -> (Arc<Supervisor>, mpsc::UnboundedSender<Vec<u8>>, Arc<FakeWorker>) {
        let config = MachineConfig {
            id: "m1".to_string(),
            name: "test machine".to_string(),
            rootfs_url: "https://example/base.tar".to_string(),
            entrypoint: vec![],
            env: vec![],
            packages: vec![],
            proxy_url: None,
            auto_save_ms: 10_000,
            connect_timeout_ms: 30_000,
        };
        let assets = Arc::new(StaticAssetSource::new(tar_with("/root/base.txt", "hi")));
        let worker = Arc::new(FakeWorker::new());
        let terminal = Arc::new(FakeTerminal::new());
        let transport = Arc::new(FakeTransport::default());
        let bridge = Arc::new(NetworkBridge::new(transport));

        let (supervisor, input_tx) = Supervisor::new(
            config,
            lock,
            assets,
            store,
            worker.clone(),
            terminal,
            bridge,
        );
        (supervisor, input_tx, worker)
    }

    #[tokio::test]
    async fn boot_reaches_running_and_starts_drain_loop() {
        let (supervisor, _input_tx, _worker) = make_supervisor();
        supervisor.boot().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);
    }

    #[tokio::test]
    async fn second_boot_of_same_machine_is_refused() {
        let lock = Arc::new(InMemoryAdvisoryLock::new());
        let (supervisor, _input_tx, _worker) = make_supervisor_with_lock(lock.clone());
        supervisor.boot().await.unwrap();

        let (other, _input_tx2, _worker2) = make_supervisor_with_lock(lock);
        let err = other.boot().await.unwrap_err();
        assert!(matches!(err, HostError::AlreadyRunning(ref id) if id == "m1"));
    }

    #[tokio::test]
    async fn pause_then_resume_round_trip() {
        let (supervisor, _input_tx, worker) = make_supervisor();
        supervisor.boot().await.unwrap();

        worker.set_export_provider(|| tar_with("/root/base.txt", "hi"));
        worker.set_snapshot_provider(|| b"registers".to_vec());

        supervisor.pause().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Paused);
        assert!(worker.is_terminated());

        supervisor.resume().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert!(worker.calls().contains(&"load_snapshot".to_string()));
    }

    #[tokio::test]
    async fn pause_survives_a_recoverable_storage_failure() {
        let lock = Arc::new(InMemoryAdvisoryLock::new());
        let store = Arc::new(InMemoryStore::with_quota(1));
        let (supervisor, _input_tx, worker) =
            make_supervisor_with_lock_and_store(lock, store);
        supervisor.boot().await.unwrap();
        let mut events = supervisor.subscribe();

        worker.set_export_provider(|| tar_with("/root/base.txt", "hi"));
        worker.set_snapshot_provider(|| b"registers".to_vec());

        supervisor.pause().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Paused);
        assert!(worker.is_terminated());

        let mut saw_warning = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SupervisorEvent::Warning { component: "overlay", .. }) {
                saw_warning = true;
            }
        }
        assert!(saw_warning, "expected a Warning event for the failed save");
    }

    #[tokio::test]
    async fn terminate_releases_the_advisory_lock() {
        let lock = Arc::new(InMemoryAdvisoryLock::new());
        let (supervisor, _input_tx, worker) = make_supervisor_with_lock(lock.clone());
        supervisor.boot().await.unwrap();
        worker.set_export_provider(|| tar_with("/root/base.txt", "hi"));

        supervisor.terminate().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Terminated);

        let (other, _input_tx2, _worker2) = make_supervisor_with_lock(lock);
        other.boot().await.unwrap();
    }

    #[tokio::test]
    async fn stolen_lock_forces_termination() {
        let lock = Arc::new(InMemoryAdvisoryLock::new());
        let (supervisor, _input_tx, worker) = make_supervisor_with_lock(lock.clone());
        supervisor.boot().await.unwrap();
        worker.set_export_provider(|| tar_with("/root/base.txt", "hi"));

        lock.steal("machine:m1", HolderId::new());
        let still_held = supervisor.check_lock_ownership().await;
        assert!(!still_held);
        assert_eq!(supervisor.state(), SupervisorState::Terminated);
    }
}
