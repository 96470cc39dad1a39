//! Event producer.
//!
//! One publish is one best-effort write: there is no internal retry. Callers
//! decide what a failed publish means for the source task (see
//! [`CreateTaskService`](crate::usecase::CreateTaskService)).

use std::error::Error as _;

use taskflow_core::Event;
use taskflow_events::{CodecError, Encode, Message};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, instrument, warn};

use crate::broker::{BrokerError, Writer};
use crate::config::ProducerConfig;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("producer: failed to marshal event")]
    MarshalingFailure(#[source] CodecError),

    #[error("producer: operation canceled")]
    OperationCanceled,

    #[error("producer: connection is closed")]
    Closed,

    #[error("producer: failed to produce message")]
    ProducingFailure(#[source] BrokerError),

    #[error("producer: failed to close connection")]
    ClosingConnection(#[source] BrokerError),
}

impl ProducerError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ProducerError::OperationCanceled)
    }
}

impl From<BrokerError> for ProducerError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Canceled => ProducerError::OperationCanceled,
            BrokerError::Closed => ProducerError::Closed,
            other => ProducerError::ProducingFailure(other),
        }
    }
}

#[derive(Debug)]
pub struct Producer<W, E> {
    config: ProducerConfig,
    writer: W,
    encoder: E,
}

impl<W, E> Producer<W, E>
where
    W: Writer,
    E: Encode,
{
    pub fn new(config: ProducerConfig, writer: W, encoder: E) -> Self {
        Self {
            config,
            writer,
            encoder,
        }
    }

    /// Publish `event` to the configured topic, keyed by its task id.
    ///
    /// The event is encoded before anything touches the network, so a
    /// marshaling failure never produces a write. A `cancel` that has already
    /// fired yields [`ProducerError::OperationCanceled`] without a write.
    #[instrument(
        skip(self, cancel, event),
        fields(topic = %self.config.topic, task_id = %event.id(), status = %event.status())
    )]
    pub async fn publish_event(
        &self,
        cancel: &CancellationToken,
        event: &Event,
    ) -> Result<(), ProducerError> {
        let value = self
            .encoder
            .encode(event)
            .map_err(ProducerError::MarshalingFailure)?;

        if cancel.is_cancelled() {
            debug!("publish skipped: already canceled");
            return Err(ProducerError::OperationCanceled);
        }

        let message = Message::new(self.config.topic.clone(), event.id().to_key(), value);
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BrokerError::Canceled),
            res = self.writer.write_messages(vec![message]) => res,
        };

        match written.map_err(ProducerError::from) {
            Ok(()) => {
                debug!("event published");
                Ok(())
            }
            Err(err) if err.is_canceled() => {
                debug!("publish canceled");
                Err(err)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    cause = err.source().map(field::display),
                    "publish failed"
                );
                Err(err)
            }
        }
    }

    /// Close the underlying writer. Call once.
    pub async fn close(&self) -> Result<(), ProducerError> {
        self.writer
            .close()
            .await
            .map_err(ProducerError::ClosingConnection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use taskflow_core::{Status, TaskId};
    use taskflow_events::{Decode, JsonCodec};

    /// Records every write and answers with a fixed outcome.
    struct RecordingWriter {
        calls: AtomicUsize,
        written: Mutex<Vec<Message>>,
        outcome: Result<(), BrokerError>,
        close_outcome: Result<(), BrokerError>,
    }

    impl RecordingWriter {
        fn returning(outcome: Result<(), BrokerError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                written: Mutex::new(Vec::new()),
                outcome,
                close_outcome: Ok(()),
            }
        }
    }

    #[async_trait]
    impl Writer for RecordingWriter {
        async fn write_messages(&self, messages: Vec<Message>) -> Result<(), BrokerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.written.lock().unwrap().extend(messages);
            self.outcome.clone()
        }

        async fn close(&self) -> Result<(), BrokerError> {
            self.close_outcome.clone()
        }
    }

    struct FailingEncoder;

    impl Encode for FailingEncoder {
        fn encode(&self, _event: &Event) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::Marshal("boom".into()))
        }
    }

    fn config() -> ProducerConfig {
        ProducerConfig::default().with_topic("tasks")
    }

    #[tokio::test]
    async fn publishes_one_message_keyed_by_task_id() {
        let producer = Producer::new(config(), RecordingWriter::returning(Ok(())), JsonCodec);
        let event = Event::update(TaskId::new(42), Status::New);

        producer
            .publish_event(&CancellationToken::new(), &event)
            .await
            .unwrap();

        let written = producer.writer.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].topic(), "tasks");
        assert_eq!(written[0].key(), b"42");
        assert_eq!(JsonCodec.decode(written[0].value()).unwrap(), event);
    }

    #[tokio::test]
    async fn already_canceled_publish_performs_no_write() {
        let producer = Producer::new(config(), RecordingWriter::returning(Ok(())), JsonCodec);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = producer
            .publish_event(&cancel, &Event::update(TaskId::new(1), Status::New))
            .await
            .unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(producer.writer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn marshaling_failure_performs_no_write() {
        let producer = Producer::new(config(), RecordingWriter::returning(Ok(())), FailingEncoder);

        let err = producer
            .publish_event(&CancellationToken::new(), &Event::update(TaskId::new(1), Status::New))
            .await
            .unwrap_err();

        assert!(matches!(err, ProducerError::MarshalingFailure(_)));
        assert_eq!(producer.writer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn write_failures_are_classified() {
        let cases = [
            (BrokerError::Canceled, "canceled"),
            (BrokerError::Closed, "closed"),
            (BrokerError::transport("leader not available"), "producing"),
        ];
        for (broker_err, expected) in cases {
            let producer = Producer::new(config(), RecordingWriter::returning(Err(broker_err)), JsonCodec);
            let err = producer
                .publish_event(&CancellationToken::new(), &Event::update(TaskId::new(7), Status::New))
                .await
                .unwrap_err();
            let kind = match err {
                ProducerError::OperationCanceled => "canceled",
                ProducerError::Closed => "closed",
                ProducerError::ProducingFailure(_) => "producing",
                other => panic!("unexpected error: {other}"),
            };
            assert_eq!(kind, expected);
        }
    }

    #[tokio::test]
    async fn close_failure_is_classified() {
        let mut writer = RecordingWriter::returning(Ok(()));
        writer.close_outcome = Err(BrokerError::transport("flush timed out"));
        let producer = Producer::new(config(), writer, JsonCodec);

        let err = producer.close().await.unwrap_err();
        assert!(matches!(err, ProducerError::ClosingConnection(_)));
        assert_eq!(err.to_string(), "producer: failed to close connection");
        assert_eq!(
            err.source().map(ToString::to_string).as_deref(),
            Some("broker transport error: flush timed out")
        );
    }
}
