//! `taskflow-core`: task pipeline domain types.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! task identifiers, lifecycle statuses, the change event exchanged between
//! services and the stored task record.

pub mod error;
pub mod event;
pub mod id;
pub mod record;
pub mod status;

pub use error::{DomainError, DomainResult};
pub use event::Event;
pub use id::TaskId;
pub use record::TaskRecord;
pub use status::{Action, Status};
