//! Application use cases on both sides of the broker.
//!
//! - [`CreateTaskService`]: producing side, stores a task and announces it
//! - [`UpdateStatusHandler`]: consuming side, the `update` action handler

pub mod create_task;
pub mod update_status;

pub use create_task::{CreateTaskError, CreateTaskService, IdSource, SequentialIds};
pub use update_status::UpdateStatusHandler;
