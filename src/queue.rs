//! Per-repository admission queue.
//!
//! Builds of the same repository key run one at a time; different keys never
//! contend. Each key owns a slot holding an async mutex and a counter of
//! tasks that hold or wait for it. Slots exist only while that counter is
//! non-zero, so the registry is bounded by current contention rather than by
//! the number of repositories ever built.
//!
//! Slot insertion and removal happen under the registry lock, together with
//! every counter change, so a late `acquire` can never register itself on a
//! slot that a concurrent release is deleting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;

use crate::repo::RepoKey;

#[derive(Default)]
struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    waiters: AtomicUsize,
}

#[derive(Default)]
pub struct BuildQueue {
    slots: Mutex<HashMap<RepoKey, Arc<Slot>>>,
}

impl BuildQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of tasks currently holding or waiting for `key`; 0 for unknown keys.
    pub fn size(&self, key: &RepoKey) -> usize {
        self.lock_slots()
            .get(key)
            .map_or(0, |slot| slot.waiters.load(Ordering::Acquire))
    }

    /// Number of keys with at least one holder or waiter.
    pub fn active_keys(&self) -> usize {
        self.lock_slots().len()
    }

    /// Waits until the caller exclusively owns `key`.
    ///
    /// The caller is counted by `size` from the moment this is called. Dropping
    /// the returned future before it completes withdraws the caller from the
    /// queue.
    pub async fn acquire(self: &Arc<Self>, key: &RepoKey) -> QueueGuard {
        let slot = self.register(key);
        let mut guard = QueueGuard {
            queue: Arc::clone(self),
            key: key.clone(),
            slot: Arc::clone(&slot),
            held: None,
        };
        guard.held = Some(Arc::clone(&slot.lock).lock_owned().await);
        guard
    }

    fn register(&self, key: &RepoKey) -> Arc<Slot> {
        let mut slots = self.lock_slots();
        let slot = slots.entry(key.clone()).or_default();
        slot.waiters.fetch_add(1, Ordering::AcqRel);
        Arc::clone(slot)
    }

    fn unregister(&self, key: &RepoKey, slot: &Arc<Slot>) {
        let mut slots = self.lock_slots();
        if slot.waiters.fetch_sub(1, Ordering::AcqRel) == 1
            && slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(key);
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<RepoKey, Arc<Slot>>> {
        // No code path panics while holding the registry lock.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive ownership of one repository key. Released on drop.
pub struct QueueGuard {
    queue: Arc<BuildQueue>,
    key: RepoKey,
    slot: Arc<Slot>,
    held: Option<OwnedMutexGuard<()>>,
}

impl QueueGuard {
    pub fn key(&self) -> &RepoKey {
        &self.key
    }

    pub fn release(self) {}
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.queue.unregister(&self.key, &self.slot);
        self.held.take();
    }
}
