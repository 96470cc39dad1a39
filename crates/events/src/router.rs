//! Action → handler routing.
//!
//! The router is an explicit instance built once at startup and shared by
//! reference (`Arc`) with the consumer. Handlers are registered per action;
//! there is no process-wide registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use taskflow_core::{Action, Event};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handler::{DispatchError, EventHandler, Handle, HandlerError};

#[derive(Clone, Default)]
pub struct Router {
    handlers: HashMap<Action, Arc<dyn EventHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing any previous registration.
    pub fn with_handler(mut self, action: Action, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(action, handler);
        self
    }
}

impl core::fmt::Debug for Router {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut actions: Vec<&str> = self.handlers.keys().map(|a| a.as_str()).collect();
        actions.sort_unstable();
        f.debug_struct("Router").field("actions", &actions).finish()
    }
}

#[async_trait]
impl Handle for Router {
    async fn pick(
        &self,
        cancel: &CancellationToken,
        action: Action,
        event: &Event,
    ) -> Result<(), DispatchError> {
        let Some(handler) = self.handlers.get(&action) else {
            debug!(%action, task_id = %event.id(), "no handler registered for action; skipping");
            return Ok(());
        };

        handler.handle(cancel, event).await.map_err(|err| match err {
            HandlerError::Canceled => DispatchError::OperationCanceled { task_id: event.id() },
            HandlerError::Failed(source) => DispatchError::ProcessingFailure {
                action,
                task_id: event.id(),
                source,
            },
        })
    }
}
