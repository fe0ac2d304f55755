//! Process-lifetime snapshot store.

use super::SnapshotStore;
use crate::error::TrackerError;
use crate::model::Snapshot;
use std::sync::{Arc, PoisonError, RwLock};

/// Holds an immutable snapshot replaced wholesale on every write.
///
/// Readers clone the `Arc` under a read lock and never see a half-applied
/// write. The merged snapshot is built while the write lock is held, so
/// concurrent writers cannot lose each other's banners.
#[derive(Default)]
pub struct MemoryStore {
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn write(&self, snapshot: &Snapshot) -> Result<(), TrackerError> {
        // The slot only ever holds a complete Arc, so a poisoned lock is still consistent.
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = match slot.as_deref() {
            Some(current) => current.upsert(snapshot),
            None => snapshot.clone(),
        };
        *slot = Some(Arc::new(next));
        Ok(())
    }

    fn read(&self) -> Result<Arc<Snapshot>, TrackerError> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TrackerError::StoreUnavailable)
    }
}
