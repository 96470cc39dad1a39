//! In-memory durable log for tests/dev.
//!
//! - One partition per topic; offsets start at 0
//! - Committed offsets are tracked per `(group, topic)`
//! - A reader keeps its own fetch cursor ahead of the committed offset;
//!   [`InMemoryReader::rewind`] moves it back, which is how uncommitted
//!   messages get redelivered (the equivalent of a partition reassignment)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use taskflow_events::Message;
use tokio::sync::Notify;

use super::{BrokerError, Reader, Writer};
use crate::config::StartOffset;

const PARTITION: i32 = 0;

#[derive(Debug, Default)]
struct LogState {
    topics: HashMap<String, Vec<Message>>,
    committed: HashMap<(String, String), i64>,
}

#[derive(Debug, Default)]
pub struct InMemoryLog {
    state: Mutex<LogState>,
    appended: Notify,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `message` to its topic, returning it stamped with its offset.
    pub fn append(&self, message: Message) -> Message {
        let stored = {
            let mut state = self.lock();
            let topic = state.topics.entry(message.topic().to_string()).or_default();
            let offset = topic.len() as i64;
            let stored = message.at_position(PARTITION, offset);
            topic.push(stored.clone());
            stored
        };
        self.appended.notify_waiters();
        stored
    }

    /// Number of messages ever appended to `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.lock().topics.get(topic).cloned().unwrap_or_default()
    }

    /// Next offset the group will read after a restart, if it ever committed.
    pub fn committed_offset(&self, group: &str, topic: &str) -> Option<i64> {
        self.lock()
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    pub fn reader(
        self: &Arc<Self>,
        topic: impl Into<String>,
        group: impl Into<String>,
        start: StartOffset,
    ) -> InMemoryReader {
        let reader = InMemoryReader {
            log: Arc::clone(self),
            topic: topic.into(),
            group: group.into(),
            start,
            cursor: Mutex::new(0),
            closed: AtomicBool::new(false),
        };
        reader.rewind();
        reader
    }

    pub fn writer(self: &Arc<Self>) -> InMemoryWriter {
        InMemoryWriter {
            log: Arc::clone(self),
            closed: AtomicBool::new(false),
        }
    }

    fn commit(&self, group: &str, message: &Message) {
        let mut state = self.lock();
        let next = message.offset() + 1;
        let entry = state
            .committed
            .entry((group.to_string(), message.topic().to_string()))
            .or_insert(next);
        *entry = (*entry).max(next);
    }
}

/// Reader bound to one topic and consumer group.
#[derive(Debug)]
pub struct InMemoryReader {
    log: Arc<InMemoryLog>,
    topic: String,
    group: String,
    start: StartOffset,
    cursor: Mutex<usize>,
    closed: AtomicBool,
}

impl InMemoryReader {
    /// Move the fetch cursor back to the group's committed offset.
    ///
    /// Messages fetched but never committed are delivered again.
    pub fn rewind(&self) {
        let committed = self.log.committed_offset(&self.group, &self.topic);
        let position = match (committed, self.start) {
            (Some(offset), _) => offset.max(0) as usize,
            (None, StartOffset::Earliest) => 0,
            (None, StartOffset::Latest) => self.log.len(&self.topic),
        };
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = position;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn try_next(&self) -> Option<Message> {
        let state = self.log.lock();
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let message = state.topics.get(&self.topic)?.get(*cursor)?.clone();
        *cursor += 1;
        Some(message)
    }
}

#[async_trait]
impl Reader for InMemoryReader {
    async fn fetch_message(&self) -> Result<Message, BrokerError> {
        loop {
            // Register interest before checking so an append in between is not missed.
            let appended = self.log.appended.notified();
            if self.is_closed() {
                return Err(BrokerError::Closed);
            }
            if let Some(message) = self.try_next() {
                return Ok(message);
            }
            appended.await;
        }
    }

    async fn commit_messages(&self, messages: &[Message]) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        for message in messages {
            if message.topic() != self.topic {
                return Err(BrokerError::transport(format!(
                    "cannot commit message from topic {} on reader for {}",
                    message.topic(),
                    self.topic
                )));
            }
            self.log.commit(&self.group, message);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        // Wake fetches parked on the notifier so they observe the close.
        self.log.appended.notify_waiters();
        Ok(())
    }
}

#[derive(Debug)]
pub struct InMemoryWriter {
    log: Arc<InMemoryLog>,
    closed: AtomicBool,
}

#[async_trait]
impl Writer for InMemoryWriter {
    async fn write_messages(&self, messages: Vec<Message>) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        for message in messages {
            self.log.append(message);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn msg(topic: &str, key: &str) -> Message {
        Message::new(topic, key.as_bytes().to_vec(), b"{}".to_vec())
    }

    #[tokio::test]
    async fn fetch_returns_messages_in_append_order() {
        let log = Arc::new(InMemoryLog::new());
        let writer = log.writer();
        writer
            .write_messages(vec![msg("t", "1"), msg("t", "2"), msg("other", "x")])
            .await
            .unwrap();

        let reader = log.reader("t", "g", StartOffset::Earliest);
        let first = reader.fetch_message().await.unwrap();
        let second = reader.fetch_message().await.unwrap();
        assert_eq!((first.offset(), first.key()), (0, b"1".as_slice()));
        assert_eq!((second.offset(), second.key()), (1, b"2".as_slice()));
    }

    #[tokio::test]
    async fn fetch_waits_for_append() {
        let log = Arc::new(InMemoryLog::new());
        let reader = log.reader("t", "g", StartOffset::Earliest);

        let appender = {
            let log = log.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                log.append(msg("t", "late"));
            })
        };

        let got = tokio::time::timeout(Duration::from_secs(1), reader.fetch_message())
            .await
            .expect("fetch should wake on append")
            .unwrap();
        assert_eq!(got.key(), b"late");
        appender.await.unwrap();
    }

    #[tokio::test]
    async fn uncommitted_messages_are_redelivered_after_rewind() {
        let log = Arc::new(InMemoryLog::new());
        for k in ["a", "b", "c"] {
            log.append(msg("t", k));
        }
        let reader = log.reader("t", "g", StartOffset::Earliest);

        let a = reader.fetch_message().await.unwrap();
        let _b = reader.fetch_message().await.unwrap();
        reader.commit_messages(&[a]).await.unwrap();
        assert_eq!(log.committed_offset("g", "t"), Some(1));

        reader.rewind();
        let again = reader.fetch_message().await.unwrap();
        assert_eq!(again.key(), b"b");
    }

    #[tokio::test]
    async fn commits_never_move_backwards() {
        let log = Arc::new(InMemoryLog::new());
        let first = log.append(msg("t", "a"));
        let second = log.append(msg("t", "b"));
        let reader = log.reader("t", "g", StartOffset::Earliest);

        reader.commit_messages(&[second]).await.unwrap();
        reader.commit_messages(&[first]).await.unwrap();
        assert_eq!(log.committed_offset("g", "t"), Some(2));
    }

    #[tokio::test]
    async fn latest_start_skips_history() {
        let log = Arc::new(InMemoryLog::new());
        log.append(msg("t", "old"));
        let reader = log.reader("t", "fresh", StartOffset::Latest);
        log.append(msg("t", "new"));

        assert_eq!(reader.fetch_message().await.unwrap().key(), b"new");
    }

    #[tokio::test]
    async fn close_wakes_pending_fetch_and_is_reported_twice() {
        let log = Arc::new(InMemoryLog::new());
        let reader = Arc::new(log.reader("t", "g", StartOffset::Earliest));

        let pending = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.fetch_message().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        reader.close().await.unwrap();
        let res = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.unwrap_err(), BrokerError::Closed);
        assert_eq!(reader.close().await.unwrap_err(), BrokerError::Closed);
        assert_eq!(reader.commit_messages(&[]).await.unwrap_err(), BrokerError::Closed);
    }

    #[tokio::test]
    async fn closed_writer_rejects_writes() {
        let log = Arc::new(InMemoryLog::new());
        let writer = log.writer();
        writer.close().await.unwrap();

        let err = writer.write_messages(vec![msg("t", "a")]).await.unwrap_err();
        assert!(err.is_closed());
        assert!(log.is_empty("t"));
    }
}
