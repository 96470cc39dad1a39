use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use taskflow_core::{Status, TaskId, TaskRecord};
use taskflow_events::{StoreError, TaskStore};

/// In-memory task store for tests/dev.
///
/// Holds [`TaskRecord`]s directly, so reads never need a type check.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("task store lock poisoned".to_string())
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, record: TaskRecord) -> Result<TaskId, StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let id = record.id;
        if map.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        map.insert(id, record);
        Ok(id)
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        map.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        let mut records: Vec<TaskRecord> = map.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn update_status(&self, id: TaskId, status: Status) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        let record = map.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.status = status;
        Ok(())
    }
}
