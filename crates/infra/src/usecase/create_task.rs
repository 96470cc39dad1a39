use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use taskflow_core::{DomainError, Event, Status, TaskId, TaskRecord};
use taskflow_events::{Encode, StoreError, TaskStore};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::Writer;
use crate::producer::{Producer, ProducerError};

/// Task id generation.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> TaskId;
}

/// Monotonic ids starting at 1.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicI64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self) -> TaskId {
        TaskId::new(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Debug, Error)]
pub enum CreateTaskError {
    #[error("create: invalid task")]
    Invalid(#[from] DomainError),

    #[error("create: task {0} already exists")]
    AlreadyExists(TaskId),

    #[error("create: database failed")]
    Storage(#[source] StoreError),

    #[error("create: failed to publish event")]
    Publish(#[source] ProducerError),
}

/// Producing side of the pipeline: persist a task, then announce it.
///
/// Storage and publishing are not transactional. When the publish fails for
/// any reason other than cancellation, the stored record is marked
/// [`Status::Failed`] so it does not sit in `new` forever.
pub struct CreateTaskService<S, W, E, I> {
    store: S,
    producer: Producer<W, E>,
    ids: I,
}

impl<S, W, E, I> CreateTaskService<S, W, E, I>
where
    S: TaskStore,
    W: Writer,
    E: Encode,
    I: IdSource,
{
    pub fn new(store: S, producer: Producer<W, E>, ids: I) -> Self {
        Self {
            store,
            producer,
            ids,
        }
    }

    pub fn producer(&self) -> &Producer<W, E> {
        &self.producer
    }

    pub async fn create(
        &self,
        cancel: &CancellationToken,
        title: &str,
    ) -> Result<TaskRecord, CreateTaskError> {
        let record = TaskRecord::new(self.ids.next_id(), title, Utc::now())?;
        let id = self.store.create(record.clone()).await.map_err(|err| match err {
            StoreError::AlreadyExists(id) => CreateTaskError::AlreadyExists(id),
            other => CreateTaskError::Storage(other),
        })?;

        let event = Event::update(id, Status::New);
        if let Err(err) = self.producer.publish_event(cancel, &event).await {
            if !err.is_canceled() {
                self.mark_failed(id).await;
            }
            return Err(CreateTaskError::Publish(err));
        }

        info!(task_id = %id, "task created");
        Ok(record)
    }

    async fn mark_failed(&self, id: TaskId) {
        match self.store.update_status(id, Status::Failed).await {
            Ok(()) => warn!(task_id = %id, "task marked failed after publish failure"),
            Err(err) => warn!(task_id = %id, error = %err, "could not mark task failed"),
        }
    }
}
