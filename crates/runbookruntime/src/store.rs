use runbookcore::{ArtifactId, Message, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory, execution-scoped artifact store.
///
/// Write-once per id: the executor never schedules the same artifact twice,
/// and a second write is rejected rather than silently replacing data a
/// dependent may already have read. Messages are handed out as `Arc`s so
/// fan-out readers share one copy.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    entries: RwLock<HashMap<ArtifactId, Arc<Message>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, id: impl Into<ArtifactId>, message: Message) -> Result<(), StoreError> {
        let id = id.into();
        let mut entries = self.write();
        if entries.contains_key(&id) {
            return Err(StoreError::AlreadyWritten(id));
        }
        entries.insert(id, Arc::new(message));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<Message>, StoreError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Stored ids, sorted.
    pub fn list_ids(&self) -> Vec<ArtifactId> {
        let mut ids: Vec<_> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-updated, so
    // poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ArtifactId, Arc<Message>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ArtifactId, Arc<Message>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
