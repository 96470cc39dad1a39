//! Assembly of both halves of the task pipeline in one process.

use std::error::Error as _;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use taskflow_core::Action;
use taskflow_events::{EventHandler, JsonCodec, Router};
use taskflow_infra::broker::{InMemoryLog, InMemoryReader, InMemoryWriter};
use taskflow_infra::storage::InMemoryTaskStore;
use taskflow_infra::usecase::{CreateTaskService, SequentialIds, UpdateStatusHandler};
use taskflow_infra::{Consumer, ConsumerError, ConsumerState, Producer, Reader, Writer};
use tokio_util::sync::CancellationToken;
use tracing::{error, field, info, warn};

use crate::settings::WorkerSettings;

pub type TaskService<W> = CreateTaskService<Arc<InMemoryTaskStore>, W, JsonCodec, SequentialIds>;

pub struct Pipeline<R, W> {
    store: Arc<InMemoryTaskStore>,
    service: TaskService<W>,
    consumer: Arc<Consumer<R, Router, JsonCodec>>,
}

impl Pipeline<InMemoryReader, InMemoryWriter> {
    /// Pipeline over a process-local log shared by producer and consumer.
    pub fn in_memory(settings: &WorkerSettings) -> Self {
        let log = Arc::new(InMemoryLog::new());
        let reader = log.reader(
            settings.consumer.topic.clone(),
            settings.consumer.group_id.clone(),
            settings.consumer.start_offset,
        );
        Self::new(settings, reader, log.writer())
    }
}

#[cfg(feature = "kafka")]
impl Pipeline<taskflow_infra::broker::KafkaReader, taskflow_infra::broker::KafkaWriter> {
    pub fn kafka(settings: &WorkerSettings) -> anyhow::Result<Self> {
        let reader = taskflow_infra::broker::KafkaReader::new(&settings.consumer)
            .context("creating kafka reader")?;
        let writer = taskflow_infra::broker::KafkaWriter::new(&settings.producer)
            .context("creating kafka writer")?;
        Ok(Self::new(settings, reader, writer))
    }
}

impl<R, W> Pipeline<R, W>
where
    R: Reader + 'static,
    W: Writer + 'static,
{
    pub fn new(settings: &WorkerSettings, reader: R, writer: W) -> Self {
        let store = Arc::new(InMemoryTaskStore::new());

        let producer = Producer::new(settings.producer.clone(), writer, JsonCodec);
        let service = CreateTaskService::new(Arc::clone(&store), producer, SequentialIds::new());

        let updater: Arc<dyn EventHandler> =
            Arc::new(UpdateStatusHandler::new(Arc::clone(&store)).with_work(settings.work));
        let router = Router::new().with_handler(Action::Update, updater);

        let consumer = Consumer::new(settings.consumer.clone(), reader, router, JsonCodec);

        Self {
            store,
            service,
            consumer: Arc::new(consumer),
        }
    }

    pub fn store(&self) -> &Arc<InMemoryTaskStore> {
        &self.store
    }

    pub fn service(&self) -> &TaskService<W> {
        &self.service
    }

    pub fn consumer_state(&self) -> ConsumerState {
        self.consumer.state()
    }

    /// Create `count` demo tasks through the regular create path.
    pub async fn seed(&self, count: usize) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        for n in 1..=count {
            let record = self
                .service
                .create(&cancel, &format!("demo task {n}"))
                .await
                .with_context(|| format!("seeding demo task {n}"))?;
            info!(task_id = %record.id, title = %record.title, "demo task created");
        }
        Ok(())
    }

    /// Consume until `stop` resolves or the consumer fails, then shut down.
    ///
    /// Fatal consumer errors are returned after the reader and writer have
    /// been closed. Teardown failures are logged only.
    pub async fn run_until<F>(&self, stop: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut running = {
            let consumer = Arc::clone(&self.consumer);
            tokio::spawn(async move { consumer.run(CancellationToken::new()).await })
        };

        let stopped_early = tokio::select! {
            joined = &mut running => Some(joined),
            _ = stop => None,
        };
        if stopped_early.is_none() {
            info!("stop requested; shutting down consumer");
        }

        if let Err(err) = self.consumer.shutdown(&CancellationToken::new()).await {
            warn!(
                error = %err,
                cause = err.source().map(field::display),
                "consumer shutdown reported an error"
            );
        }
        let requested = stopped_early.is_none();
        let joined = match stopped_early {
            Some(joined) => joined,
            None => running.await,
        };

        if let Err(err) = self.service.producer().close().await {
            warn!(
                error = %err,
                cause = err.source().map(field::display),
                "failed to close producer"
            );
        }

        match joined.context("consumer task panicked")? {
            Ok(()) => Ok(()),
            // Stop arrived before the consumer task got to start.
            Err(ConsumerError::ConsumerAlreadyClosed) if requested => Ok(()),
            Err(err) => {
                error!(
                    error = %err,
                    cause = err.source().map(field::display),
                    fatal = err.is_fatal(),
                    "consumer stopped with an error"
                );
                Err(err).context("consumer failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use taskflow_core::Status;
    use taskflow_events::TaskStore;

    fn settings(demo_tasks: usize) -> WorkerSettings {
        let mut settings = WorkerSettings {
            demo_tasks,
            work: Duration::from_millis(1),
            ..WorkerSettings::default()
        };
        settings.consumer = settings.consumer.with_workers(2, 1);
        settings
    }

    async fn all_completed(store: Arc<InMemoryTaskStore>, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let tasks = store.list().await.unwrap();
            if tasks.len() == expected && tasks.iter().all(|t| t.status == Status::Completed) {
                return;
            }
            assert!(Instant::now() < deadline, "demo tasks never completed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn seeded_tasks_complete_before_stop() {
        let settings = settings(3);
        let pipeline = Pipeline::in_memory(&settings);
        pipeline.seed(settings.demo_tasks).await.unwrap();

        let stop = all_completed(Arc::clone(pipeline.store()), 3);
        pipeline.run_until(stop).await.unwrap();

        assert_eq!(pipeline.consumer_state(), ConsumerState::Closed);
    }

    #[tokio::test]
    async fn immediate_stop_closes_cleanly() {
        let pipeline = Pipeline::in_memory(&settings(0));
        pipeline.run_until(async {}).await.unwrap();
        assert_eq!(pipeline.consumer_state(), ConsumerState::Closed);
    }
}
