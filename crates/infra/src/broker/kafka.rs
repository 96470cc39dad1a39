//! Kafka-backed [`Reader`] and [`Writer`] (feature `kafka`).
//!
//! Offsets are committed manually: auto-commit is always disabled so the
//! consumer stays in control of at-least-once delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::{Offset, TopicPartitionList};
use taskflow_events::Message;
use tracing::{debug, info};

use super::{BrokerError, Reader, Writer};
use crate::config::{ConsumerConfig, ProducerConfig, StartOffset};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn classify(err: KafkaError) -> BrokerError {
    match err {
        KafkaError::Canceled => BrokerError::Canceled,
        other => BrokerError::transport(other.to_string()),
    }
}

/// A zero commit interval means every commit is acknowledged before returning.
fn commit_mode(interval: Duration) -> CommitMode {
    if interval.is_zero() {
        CommitMode::Sync
    } else {
        CommitMode::Async
    }
}

pub struct KafkaReader {
    consumer: Arc<StreamConsumer>,
    commit_mode: CommitMode,
    closed: AtomicBool,
}

impl KafkaReader {
    pub fn new(config: &ConsumerConfig) -> Result<Self, BrokerError> {
        let offset_reset = match config.start_offset {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", offset_reset)
            .set("session.timeout.ms", config.session_timeout.as_millis().to_string())
            .create()
            .map_err(classify)?;

        consumer.subscribe(&[config.topic.as_str()]).map_err(classify)?;

        let commit_mode = commit_mode(config.commit_interval);

        info!(
            brokers = %config.brokers.join(","),
            topic = %config.topic,
            group_id = %config.group_id,
            "kafka reader subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            commit_mode,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Reader for KafkaReader {
    async fn fetch_message(&self) -> Result<Message, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let borrowed = self.consumer.recv().await.map_err(classify)?;

        let produced_at = borrowed
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        let message = Message::new(
            borrowed.topic(),
            borrowed.key().map(<[u8]>::to_vec).unwrap_or_default(),
            borrowed.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        )
        .at_position(borrowed.partition(), borrowed.offset())
        .with_produced_at(produced_at);
        Ok(message)
    }

    async fn commit_messages(&self, messages: &[Message]) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let mut tpl = TopicPartitionList::new();
        for message in messages {
            tpl.add_partition_offset(
                message.topic(),
                message.partition(),
                Offset::Offset(message.offset() + 1),
            )
            .map_err(classify)?;
        }
        match self.commit_mode {
            CommitMode::Async => self.consumer.commit(&tpl, CommitMode::Async).map_err(classify),
            // librdkafka blocks until the broker acknowledges a sync commit.
            CommitMode::Sync => {
                let consumer = Arc::clone(&self.consumer);
                tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
                    .await
                    .map_err(|err| BrokerError::transport(err.to_string()))?
                    .map_err(classify)
            }
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        self.consumer.unsubscribe();
        debug!("kafka reader unsubscribed");
        Ok(())
    }
}

pub struct KafkaWriter {
    producer: FutureProducer,
    closed: AtomicBool,
}

impl KafkaWriter {
    pub fn new(config: &ProducerConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("linger.ms", config.batch_timeout.as_millis().to_string())
            .set("acks", config.required_acks.as_kafka_value())
            .set(
                "allow.auto.create.topics",
                if config.allow_topic_creation { "true" } else { "false" },
            )
            .create()
            .map_err(classify)?;

        info!(brokers = %config.brokers.join(","), topic = %config.topic, "kafka writer created");
        Ok(Self {
            producer,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Writer for KafkaWriter {
    async fn write_messages(&self, messages: Vec<Message>) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        for message in &messages {
            let record = FutureRecord::to(message.topic())
                .key(message.key())
                .payload(message.value())
                .timestamp(message.produced_at().timestamp_millis());
            self.producer
                .send(record, FLUSH_TIMEOUT)
                .await
                .map_err(|(err, _)| classify(err))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|err| BrokerError::transport(err.to_string()))?
            .map_err(classify)
    }
}
