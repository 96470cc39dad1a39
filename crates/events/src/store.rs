use std::sync::Arc;

use async_trait::async_trait;
use taskflow_core::{Status, TaskId, TaskRecord};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {0} already exists")]
    AlreadyExists(TaskId),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Keyed task storage port.
///
/// Values are typed: a store holds [`TaskRecord`]s and nothing else, so there
/// is no "incompatible value" failure mode to handle at read time.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, record: TaskRecord) -> Result<TaskId, StoreError>;

    async fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError>;

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError>;

    /// Overwrite the status of an existing task.
    async fn update_status(&self, id: TaskId, status: Status) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> TaskStore for Arc<S>
where
    S: TaskStore + ?Sized,
{
    async fn create(&self, record: TaskRecord) -> Result<TaskId, StoreError> {
        (**self).create(record).await
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        (**self).get(id).await
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        (**self).list().await
    }

    async fn update_status(&self, id: TaskId, status: Status) -> Result<(), StoreError> {
        (**self).update_status(id, status).await
    }
}
