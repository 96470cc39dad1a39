//! Dispatch capability consumed by the broker consumer.
//!
//! Two layers:
//!
//! - [`EventHandler`]: business logic for **one** action (e.g. the status
//!   update use case). External collaborators implement this.
//! - [`Handle`]: the consumer-facing capability that routes an event by its
//!   action. [`Router`](crate::Router) is the stock implementation.
//!
//! ## Cancellation vs failure
//!
//! The consumer applies a different log/commit policy to each outcome, so
//! the error types keep them apart:
//!
//! - `Ok(())`: the message is committed
//! - [`DispatchError::OperationCanceled`]: the worker stops quietly, no commit
//! - [`DispatchError::ProcessingFailure`]: logged, no commit (the message is
//!   redelivered, so handlers must be idempotent)

use std::sync::Arc;

use async_trait::async_trait;
use taskflow_core::{Action, Event, TaskId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error returned by a single-action [`EventHandler`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler observed cancellation and gave up.
    #[error("operation canceled")]
    Canceled,

    /// Business-level failure.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, HandlerError::Canceled)
    }
}

/// Error returned by [`Handle::pick`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch canceled for task {task_id}")]
    OperationCanceled { task_id: TaskId },

    #[error("failed to process {action} event for task {task_id}")]
    ProcessingFailure {
        action: Action,
        task_id: TaskId,
        #[source]
        source: anyhow::Error,
    },
}

impl DispatchError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, DispatchError::OperationCanceled { .. })
    }
}

/// Handles events for a single action.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process `event`.
    ///
    /// `cancel` fires when the consumer gives up on in-flight work; long
    /// operations should race against it and return [`HandlerError::Canceled`].
    async fn handle(&self, cancel: &CancellationToken, event: &Event) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H> EventHandler for Arc<H>
where
    H: EventHandler + ?Sized,
{
    async fn handle(&self, cancel: &CancellationToken, event: &Event) -> Result<(), HandlerError> {
        (**self).handle(cancel, event).await
    }
}

/// Routes an event to whatever handles its action.
///
/// An action nobody handles is **not** an error: implementations return
/// `Ok(())` so the message is committed and the log keeps moving.
#[async_trait]
pub trait Handle: Send + Sync {
    async fn pick(
        &self,
        cancel: &CancellationToken,
        action: Action,
        event: &Event,
    ) -> Result<(), DispatchError>;
}

#[async_trait]
impl<H> Handle for Arc<H>
where
    H: Handle + ?Sized,
{
    async fn pick(
        &self,
        cancel: &CancellationToken,
        action: Action,
        event: &Event,
    ) -> Result<(), DispatchError> {
        (**self).pick(cancel, action, event).await
    }
}
