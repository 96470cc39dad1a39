//! Broker client configuration.
//!
//! Both structs are flat, immutable once handed to a client, and
//! deserializable from any serde source. Durations travel as integer
//! milliseconds (`*_ms` keys).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where a consumer group with no committed offset starts reading.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    #[default]
    Earliest,
    Latest,
}

/// Acknowledgement level the producer waits for on each write.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequiredAcks {
    /// Fire and forget.
    None,
    /// Partition leader only.
    #[default]
    Leader,
    /// Every in-sync replica.
    All,
}

impl RequiredAcks {
    /// Value of the `acks` client property.
    pub fn as_kafka_value(self) -> &'static str {
        match self {
            RequiredAcks::None => "0",
            RequiredAcks::Leader => "1",
            RequiredAcks::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    #[serde(rename = "batch_timeout_ms", with = "millis")]
    pub batch_timeout: Duration,
    pub required_acks: RequiredAcks,
    pub allow_topic_creation: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "tasks".to_string(),
            batch_timeout: Duration::from_millis(10),
            required_acks: RequiredAcks::Leader,
            allow_topic_creation: false,
        }
    }
}

impl ProducerConfig {
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_brokers(mut self, brokers: Vec<String>) -> Self {
        self.brokers = brokers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    /// Zero means every commit is flushed synchronously.
    #[serde(rename = "commit_interval_ms", with = "millis")]
    pub commit_interval: Duration,
    #[serde(rename = "session_timeout_ms", with = "millis")]
    pub session_timeout: Duration,
    pub start_offset: StartOffset,

    /// Grace period `shutdown` grants workers before canceling them.
    #[serde(rename = "shutdown_timeout_ms", with = "millis")]
    pub shutdown_timeout: Duration,
    /// Consecutive fetch failures tolerated before `run` gives up.
    pub retry_amount: u32,
    pub worker_count: usize,
    pub jobs_multiplier: usize,

    /// First non-zero fetch backoff; doubles on every further failure.
    #[serde(rename = "retry_backoff_ms", with = "millis")]
    pub retry_backoff: Duration,
    /// Optional cap on the fetch backoff. Uncapped when absent.
    #[serde(rename = "max_backoff_ms", with = "opt_millis")]
    pub max_backoff: Option<Duration>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "tasks".to_string(),
            group_id: "taskflow".to_string(),
            commit_interval: Duration::ZERO,
            session_timeout: Duration::from_secs(10),
            start_offset: StartOffset::Earliest,
            shutdown_timeout: Duration::from_secs(5),
            retry_amount: 3,
            worker_count: 1,
            jobs_multiplier: 1,
            retry_backoff: Duration::from_secs(2),
            max_backoff: None,
        }
    }
}

impl ConsumerConfig {
    /// Copy with worker count and job multiplier coerced to at least 1.
    ///
    /// A zero worker count would leave the bounded queue without a consumer
    /// and deadlock the fetch loop.
    pub fn normalized(mut self) -> Self {
        self.worker_count = self.worker_count.max(1);
        self.jobs_multiplier = self.jobs_multiplier.max(1);
        self
    }

    /// Capacity of the job queue between the fetch loop and the workers.
    pub fn queue_capacity(&self) -> usize {
        self.worker_count
            .max(1)
            .saturating_mul(self.jobs_multiplier.max(1))
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_workers(mut self, worker_count: usize, jobs_multiplier: usize) -> Self {
        self.worker_count = worker_count;
        self.jobs_multiplier = jobs_multiplier;
        self
    }

    pub fn with_retry(mut self, retry_amount: u32, retry_backoff: Duration) -> Self {
        self.retry_amount = retry_amount;
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = Some(max_backoff);
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => super::millis::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
