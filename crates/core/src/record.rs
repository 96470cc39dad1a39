use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::{Status, TaskId};

/// Stored task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub status: Status,
}

impl TaskRecord {
    /// Create a fresh record in [`Status::New`].
    ///
    /// Titles are trimmed; an empty title is rejected.
    pub fn new(id: TaskId, title: impl Into<String>, created_at: DateTime<Utc>) -> DomainResult<Self> {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(DomainError::validation("task title can't be empty"));
        }
        Ok(Self {
            id,
            title,
            created_at,
            status: Status::New,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_as_new() {
        let rec = TaskRecord::new(TaskId::new(1), "  write report ", Utc::now()).unwrap();
        assert_eq!(rec.status, Status::New);
        assert_eq!(rec.title, "write report");
    }

    #[test]
    fn blank_title_is_rejected() {
        let err = TaskRecord::new(TaskId::new(1), "   ", Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
