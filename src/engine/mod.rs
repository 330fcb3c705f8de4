mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::{classify, Classification};
pub use error::EngineError;
pub use store::{IntervalStore, WalStore};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

/// Engine over the durable WAL-backed store.
pub type WalEngine = Engine<WalStore>;

/// Admission engine. Writes on one resource run one at a time
/// (read → classify → write under a per-resource lock); different
/// resources never share a lock.
pub struct Engine<S> {
    store: Arc<S>,
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl<S: IntervalStore> Engine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Acquire the admission lock entry for `resource_id`, creating it if
    /// needed. A guard only counts once its mutex is still the one in `locks`;
    /// a waiter whose entry was retired meanwhile starts over.
    pub(super) async fn acquire(&self, resource_id: Ulid) -> OwnedMutexGuard<()> {
        loop {
            // Clone the Arc out so the DashMap shard isn't held across the await.
            let lock = self.locks.entry(resource_id).or_default().clone();
            let guard = lock.clone().lock_owned().await;
            let current = self
                .locks
                .get(&resource_id)
                .is_some_and(|e| Arc::ptr_eq(e.value(), &lock));
            if current {
                return guard;
            }
        }
    }

    /// Lock an existing resource. Unknown ids get `ResourceNotFound` and
    /// leave nothing behind in `locks`.
    pub(super) async fn lock_resource(
        &self,
        resource_id: Ulid,
    ) -> Result<OwnedMutexGuard<()>, EngineError> {
        if !self.store.contains_resource(resource_id).await? {
            return Err(EngineError::ResourceNotFound(resource_id));
        }
        let guard = self.acquire(resource_id).await;
        // Deleted while we waited.
        if !self.store.contains_resource(resource_id).await? {
            self.retire_lock(&resource_id);
            return Err(EngineError::ResourceNotFound(resource_id));
        }
        Ok(guard)
    }

    /// Drop the lock entry for `resource_id`. Only call while holding its guard.
    pub(super) fn retire_lock(&self, resource_id: &Ulid) {
        self.locks.remove(resource_id);
    }
}
