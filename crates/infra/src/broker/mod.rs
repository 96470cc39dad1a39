//! Durable log ports.
//!
//! The producer and consumer talk to the broker only through [`Writer`] and
//! [`Reader`]. Each instance is owned by exactly one client and closed once.
//!
//! Implementations:
//! - [`in_memory`]: single-process log for tests/dev
//! - `kafka` (feature `kafka`): `rdkafka`-backed reader and writer

use std::sync::Arc;

use async_trait::async_trait;
use taskflow_events::Message;
use thiserror::Error;

pub mod in_memory;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use in_memory::{InMemoryLog, InMemoryReader, InMemoryWriter};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaReader, KafkaWriter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The call was abandoned because its caller went away.
    #[error("broker operation canceled")]
    Canceled,

    /// The reader/writer (or its group) has already been closed.
    #[error("broker connection is closed")]
    Closed,

    /// Any other transport-level failure.
    #[error("broker transport error: {0}")]
    Transport(String),
}

impl BrokerError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, BrokerError::Canceled)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, BrokerError::Closed)
    }
}

/// Consumer-side log capability.
///
/// Cancellation is expressed by dropping the returned futures; callers race
/// them against their own cancellation tokens.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Wait for the next message assigned to this reader.
    async fn fetch_message(&self) -> Result<Message, BrokerError>;

    /// Advance the group's durable position past `messages`.
    async fn commit_messages(&self, messages: &[Message]) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Producer-side log capability.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn write_messages(&self, messages: Vec<Message>) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
impl<R> Reader for Arc<R>
where
    R: Reader + ?Sized,
{
    async fn fetch_message(&self) -> Result<Message, BrokerError> {
        (**self).fetch_message().await
    }

    async fn commit_messages(&self, messages: &[Message]) -> Result<(), BrokerError> {
        (**self).commit_messages(messages).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        (**self).close().await
    }
}

#[async_trait]
impl<W> Writer for Arc<W>
where
    W: Writer + ?Sized,
{
    async fn write_messages(&self, messages: Vec<Message>) -> Result<(), BrokerError> {
        (**self).write_messages(messages).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        (**self).close().await
    }
}
