use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use taskflow_core::{Event, Status, TaskId};
use taskflow_events::{EventHandler, HandlerError, StoreError, TaskStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default simulated processing time between `processing` and `completed`.
pub const DEFAULT_WORK: Duration = Duration::from_secs(10);

/// Handler for [`Action::Update`](taskflow_core::Action::Update) events.
///
/// Moves the task to `processing`, performs the unit of work, then marks it
/// `completed`. Both writes are plain overwrites, so handling the same event
/// twice ends in the same state as handling it once.
#[derive(Debug)]
pub struct UpdateStatusHandler<S> {
    store: S,
    work: Duration,
}

impl<S> UpdateStatusHandler<S>
where
    S: TaskStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            work: DEFAULT_WORK,
        }
    }

    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    async fn set_status(
        &self,
        cancel: &CancellationToken,
        id: TaskId,
        status: Status,
    ) -> Result<(), HandlerError> {
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HandlerError::Canceled),
            res = self.store.update_status(id, status) => res,
        };
        res.map_err(|err| match err {
            StoreError::NotFound(_) => anyhow::Error::new(err).context("update: no records found"),
            other => anyhow::Error::new(other).context("update: database failed"),
        })
        .with_context(|| format!("setting task {id} to {status}"))
        .map_err(HandlerError::Failed)
    }
}

#[async_trait]
impl<S> EventHandler for UpdateStatusHandler<S>
where
    S: TaskStore,
{
    async fn handle(&self, cancel: &CancellationToken, event: &Event) -> Result<(), HandlerError> {
        if cancel.is_cancelled() {
            return Err(HandlerError::Canceled);
        }
        let id = event.id();

        self.set_status(cancel, id, Status::Processing).await?;
        debug!(task_id = %id, "task processing");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HandlerError::Canceled),
            _ = tokio::time::sleep(self.work) => {}
        }

        self.set_status(cancel, id, Status::Completed).await?;
        info!(task_id = %id, "task completed");
        Ok(())
    }
}
