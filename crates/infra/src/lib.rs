//! Infrastructure layer: broker client, durable log adapters, storage and use cases.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod producer;
pub mod storage;
pub mod usecase;

pub use broker::{BrokerError, Reader, Writer};
pub use config::{ConsumerConfig, ProducerConfig, RequiredAcks, StartOffset};
pub use consumer::{Consumer, ConsumerError, ConsumerState};
pub use producer::{Producer, ProducerError};
