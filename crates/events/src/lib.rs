//! Event contracts shared by the producing and consuming services.
//!
//! Everything here is mechanics-only: the wire envelope, the pluggable codec,
//! the dispatch capability and the storage port. Transport implementations
//! live in `taskflow-infra`.

pub mod codec;
pub mod handler;
pub mod message;
pub mod router;
pub mod store;

pub use codec::{CodecError, Decode, Encode, JsonCodec};
pub use handler::{DispatchError, EventHandler, Handle, HandlerError};
pub use message::Message;
pub use router::Router;
pub use store::{StoreError, TaskStore};
