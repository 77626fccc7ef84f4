use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Per-key lock registry.
///
/// The store serializes individual statements, but a governor check or a
/// delegation suspension is a read-modify-write *sequence*; interleaving two
/// of them for the same key loses updates. Components hold the key's lock
/// for the whole sequence via [`KeyLocks::with_lock`].
#[derive(Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for (family, key). Locks are scoped
    /// to the composite key, so unrelated fingerprints never contend.
    pub fn with_lock<R>(&self, family: &str, key: &str, f: impl FnOnce() -> R) -> R {
        let composite = format!("{family}/{key}");
        // Clone the Arc out before locking so the map shard is released.
        let cell = {
            let entry = self.locks.entry(composite).or_default();
            Arc::clone(entry.value())
        };
        let _guard = cell.lock();
        f()
    }
}
