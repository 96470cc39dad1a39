use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Action, Status, TaskId};

/// State-change notification for a single task.
///
/// Events are:
/// - **immutable** (treat them as facts; no setters)
/// - created once per business action and serialized once by the producer
/// - identified only by the task they wrap
///
/// `action` is the sole routing key on the consuming side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    id: TaskId,
    action: Action,
    status: Status,
    timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(id: TaskId, action: Action, status: Status, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            action,
            status,
            timestamp,
        }
    }

    /// An `update` event stamped with the current time.
    pub fn update(id: TaskId, status: Status) -> Self {
        Self::new(id, Action::Update, status, Utc::now())
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
