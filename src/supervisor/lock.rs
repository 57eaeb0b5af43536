//! Single-tab ownership arbitration: an origin-scoped advisory lock on
//! `machine:{id}`. Re-entry with steal is the only way to take the lock
//! away from another holder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Opaque identity of a lock holder. Each `Supervisor` instance mints its
/// own on construction; a holder that observes a different id on its
/// machine's lock knows it has been stolen from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HolderId(u64);

static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);

impl HolderId {
    pub fn new() -> Self {
        Self(NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HolderId {
    fn default() -> Self {
        Self::new()
    }
}

/// Origin-scoped advisory lock keyed by machine id.
///
/// Modeled on the browser's Web Locks API: exclusive, named, with no
/// built-in steal primitive — steal is re-entry that simply overwrites the
/// held-by record.
pub trait AdvisoryLock: Send + Sync {
    /// Attempts to acquire `name` for `holder`. Fails (returns `false`) if
    /// another holder already owns it.
    fn try_acquire(&self, name: &str, holder: HolderId) -> bool;

    /// Unconditionally takes `name` for `holder`, regardless of the
    /// current owner.
    fn steal(&self, name: &str, holder: HolderId);

    /// Whether `holder` is still the recorded owner of `name`. A holder
    /// that observes `false` here has been stolen from and must terminate
    /// within the deadline.
    fn is_held_by(&self, name: &str, holder: HolderId) -> bool;

    /// Releases `name` iff `holder` currently owns it.
    fn release(&self, name: &str, holder: HolderId);
}

/// In-process advisory lock. A production deployment backs this with the
/// browser's `navigator.locks` API (no steal support — the production
/// adapter instead uses a `BroadcastChannel` ping to ask the current
/// holder to release); this in-memory version is what the crate's own
/// tests and the single-tab-per-process native host use.
#[derive(Default)]
pub struct InMemoryAdvisoryLock {
    holders: Mutex<HashMap<String, HolderId>>,
}

impl InMemoryAdvisoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdvisoryLock for InMemoryAdvisoryLock {
    fn try_acquire(&self, name: &str, holder: HolderId) -> bool {
        let mut holders = self.holders.lock();
        if holders.contains_key(name) {
            return false;
        }
        holders.insert(name.to_string(), holder);
        true
    }

    fn steal(&self, name: &str, holder: HolderId) {
        self.holders.lock().insert(name.to_string(), holder);
    }

    fn is_held_by(&self, name: &str, holder: HolderId) -> bool {
        self.holders.lock().get(name).copied() == Some(holder)
    }

    fn release(&self, name: &str, holder: HolderId) {
        let mut holders = self.holders.lock();
        if holders.get(name).copied() == Some(holder) {
            holders.remove(name);
        }
    }
}
