//! End-to-end lifecycle coverage for `Supervisor` against the in-memory
//! fakes: a full boot-write-reload cycle.
//!
//! Requires `--features test-internals` to pull in `FakeWorker`,
//! `FakeTerminal`, `FakeTransport` and `InMemoryAdvisoryLock`.
#![cfg(feature = "test-internals")]

use std::sync::Arc;

use machinehost::config::MachineConfig;
use machinehost::netbridge::{FakeTransport, NetworkBridge};
use machinehost::overlay::store::InMemoryStore;
use machinehost::supervisor::{
    AssetSource, FakeTerminal, FakeWorker, HolderId, InMemoryAdvisoryLock, StaticAssetSource,
    Supervisor, SupervisorState,
};

fn config(id: &str) -> MachineConfig {
    MachineConfig {
        id: id.to_string(),
        name: "e2e machine".to_string(),
        rootfs_url: "https://example/base.tar".to_string(),
        entrypoint: vec![],
        env: vec![],
        packages: vec![],
        proxy_url: None,
        auto_save_ms: 10_000,
        connect_timeout_ms: 30_000,
    }
}

fn boot_fresh(
    id: &str,
    lock: Arc<InMemoryAdvisoryLock>,
) -> (Arc<Supervisor>, tokio::sync::mpsc::UnboundedSender<Vec<u8>>, Arc<FakeWorker>) {
    let assets: Arc<dyn AssetSource> = Arc::new(StaticAssetSource::default());
    let store = Arc::new(InMemoryStore::new());
    let worker = Arc::new(FakeWorker::new());
    let terminal = Arc::new(FakeTerminal::new());
    let bridge = Arc::new(NetworkBridge::new(Arc::new(FakeTransport::default())));

    let (supervisor, input_tx) = Supervisor::new(
        config(id),
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
async fn boot_reaches_running_state() {
    let lock = Arc::new(InMemoryAdvisoryLock::new());
    let (supervisor, _input_tx, _worker) = boot_fresh("e2e-boot", lock);
    supervisor.boot().await.expect("boot should succeed");
    assert_eq!(supervisor.state(), SupervisorState::Running);
    supervisor.terminate().await.expect("terminate should succeed");
}

#[tokio::test]
async fn full_pause_resume_terminate_round_trip() {
    let lock = Arc::new(InMemoryAdvisoryLock::new());
    let (supervisor, _input_tx, worker) = boot_fresh("e2e-pause", lock);
    supervisor.boot().await.expect("boot should succeed");

    worker.set_export_provider(|| Vec::new());
    worker.set_snapshot_provider(|| b"registers".to_vec());

    supervisor.pause().await.expect("pause should succeed");
    assert_eq!(supervisor.state(), SupervisorState::Paused);

    supervisor.resume().await.expect("resume should succeed");
    assert_eq!(supervisor.state(), SupervisorState::Running);

    supervisor.terminate().await.expect("terminate should succeed");
    assert_eq!(supervisor.state(), SupervisorState::Terminated);
}

#[tokio::test]
async fn second_tab_is_refused_until_first_releases() {
    let lock = Arc::new(InMemoryAdvisoryLock::new());

    let (supervisor_a, _tx_a, worker_a) = boot_fresh("e2e-takeover", lock.clone());
    supervisor_a.boot().await.expect("first tab should boot");
    worker_a.set_export_provider(|| Vec::new());

    let (supervisor_b, _tx_b, _worker_b) = boot_fresh("e2e-takeover", lock);
    assert!(supervisor_b.boot().await.is_err());

    supervisor_a
        .terminate()
        .await
        .expect("terminate should release the lock");

    supervisor_b
        .boot()
        .await
        .expect("second tab should boot once the lock is released");
    supervisor_b.terminate().await.expect("cleanup");
}

#[tokio::test]
async fn steal_forces_the_original_holder_to_terminate() {
    let lock = Arc::new(InMemoryAdvisoryLock::new());
    let (supervisor, _input_tx, worker) = boot_fresh("e2e-steal", lock.clone());
    supervisor.boot().await.expect("boot should succeed");
    worker.set_export_provider(|| Vec::new());

    lock.steal("machine:e2e-steal", HolderId::new());
    let still_held = supervisor.check_lock_ownership().await;
    assert!(!still_held);
    assert_eq!(supervisor.state(), SupervisorState::Terminated);
}
