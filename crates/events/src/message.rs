use chrono::{DateTime, Utc};

/// Broker message envelope.
///
/// This is the unit written to and fetched from the log.
///
/// Notes:
/// - `key` is derived from the task identifier so all events of one task land
///   on the same partition.
/// - `value` is the codec output; no schema version is carried.
/// - `partition`/`offset` are assigned by the log on append and are what a
///   commit acknowledges. Freshly built messages carry `-1` for both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    partition: i32,
    offset: i64,

    key: Vec<u8>,
    value: Vec<u8>,
    produced_at: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition: -1,
            offset: -1,
            key,
            value,
            produced_at: Utc::now(),
        }
    }

    /// Stamp the log position assigned on append.
    pub fn at_position(mut self, partition: i32, offset: i64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }

    pub fn with_produced_at(mut self, produced_at: DateTime<Utc>) -> Self {
        self.produced_at = produced_at;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }
}
