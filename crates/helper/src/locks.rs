//! Concurrency discipline for the helper (spec §4.3, §5): a lazily
//! initialized per-CTID mutex table, a global exec semaphore, a global
//! terminal semaphore, and a single-slot update lock. Grounded on the
//! teacher's `DashMap`-keyed shared-state idiom (`agent/src/state/agent.rs`).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

pub struct LockTable {
    per_ctid: DashMap<u32, Arc<Mutex<()>>>,
    exec_semaphore: Arc<Semaphore>,
    terminal_semaphore: Arc<Semaphore>,
    update_lock: Arc<Mutex<()>>,
}

impl LockTable {
    pub fn new(exec_capacity: usize, terminal_capacity: usize) -> Self {
        Self {
            per_ctid: DashMap::new(),
            exec_semaphore: Arc::new(Semaphore::new(exec_capacity)),
            terminal_semaphore: Arc::new(Semaphore::new(terminal_capacity)),
            update_lock: Arc::new(Mutex::new(())),
        }
    }

    fn ctid_mutex(&self, ctid: u32) -> Arc<Mutex<()>> {
        self.per_ctid
            .entry(ctid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Serializes all config-mutating operations (`pct set`, LXC config
    /// append) on a single CTID.
    pub async fn lock_ctid(&self, ctid: u32) -> tokio::sync::OwnedMutexGuard<()> {
        self.ctid_mutex(ctid).lock_owned().await
    }

    /// Returns `None` immediately (no queueing) if the exec semaphore is
    /// exhausted, per spec §5: helper requests never queue internally.
    pub fn try_acquire_exec(&self) -> Option<OwnedSemaphorePermit> {
        self.exec_semaphore.clone().try_acquire_owned().ok()
    }

    pub fn try_acquire_terminal(&self) -> Option<OwnedSemaphorePermit> {
        self.terminal_semaphore.clone().try_acquire_owned().ok()
    }

    pub fn try_lock_update(&self) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        self.update_lock.clone().try_lock_owned().ok()
    }
}
