//! Producer → in-memory log → consumer → store, wired as in production.

use std::sync::Arc;
use std::time::{Duration, Instant};

use taskflow_core::{Action, Status, TaskId};
use taskflow_events::{JsonCodec, Router, TaskStore};
use taskflow_infra::broker::InMemoryLog;
use taskflow_infra::storage::InMemoryTaskStore;
use taskflow_infra::usecase::{CreateTaskService, SequentialIds, UpdateStatusHandler};
use taskflow_infra::{Consumer, ConsumerConfig, Producer, ProducerConfig, Reader, StartOffset};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "tasks";
const GROUP: &str = "status-updater";

fn router(store: Arc<InMemoryTaskStore>, work: Duration) -> Router {
    let handler = UpdateStatusHandler::new(store).with_work(work);
    Router::new().with_handler(Action::Update, Arc::new(handler))
}

async fn wait_for_status(store: &InMemoryTaskStore, id: TaskId, status: Status) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if store.get(id).await.map(|r| r.status) == Ok(status) {
            return;
        }
        assert!(Instant::now() < deadline, "task {id} never reached {status}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn created_tasks_are_completed_by_the_consumer() {
    let log = Arc::new(InMemoryLog::new());
    let store = Arc::new(InMemoryTaskStore::new());

    let producer = Producer::new(ProducerConfig::default().with_topic(TOPIC), log.writer(), JsonCodec);
    let service = CreateTaskService::new(store.clone(), producer, SequentialIds::new());

    let consumer = Arc::new(Consumer::new(
        ConsumerConfig::default()
            .with_topic(TOPIC)
            .with_group_id(GROUP)
            .with_workers(2, 2),
        log.reader(TOPIC, GROUP, StartOffset::Earliest),
        router(store.clone(), Duration::from_millis(5)),
        JsonCodec,
    ));
    let running = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run(CancellationToken::new()).await })
    };

    let cancel = CancellationToken::new();
    let mut ids = Vec::new();
    for title in ["write report", "review report", "ship report"] {
        ids.push(service.create(&cancel, title).await.unwrap().id);
    }

    for id in &ids {
        wait_for_status(&store, *id, Status::Completed).await;
    }

    consumer.shutdown(&CancellationToken::new()).await.unwrap();
    running.await.unwrap().unwrap();
    service.producer().close().await.unwrap();

    assert_eq!(log.committed_offset(GROUP, TOPIC), Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interrupted_delivery_is_redelivered_and_completes() {
    let log = Arc::new(InMemoryLog::new());
    let store = Arc::new(InMemoryTaskStore::new());
    let producer = Producer::new(ProducerConfig::default().with_topic(TOPIC), log.writer(), JsonCodec);
    let service = CreateTaskService::new(store.clone(), producer, SequentialIds::new());
    let record = service.create(&CancellationToken::new(), "flaky").await.unwrap();

    // First delivery: the handler is still working when the grace period ends.
    let first = Arc::new(Consumer::new(
        ConsumerConfig::default()
            .with_topic(TOPIC)
            .with_group_id(GROUP)
            .with_shutdown_timeout(Duration::from_millis(10)),
        log.reader(TOPIC, GROUP, StartOffset::Earliest),
        router(store.clone(), Duration::from_secs(10)),
        JsonCodec,
    ));
    let running = {
        let consumer = first.clone();
        tokio::spawn(async move { consumer.run(CancellationToken::new()).await })
    };
    wait_for_status(&store, record.id, Status::Processing).await;
    first.shutdown(&CancellationToken::new()).await.unwrap();
    running.await.unwrap().unwrap();
    assert_eq!(log.committed_offset(GROUP, TOPIC), None);

    // Second delivery to the same group picks the event up again.
    let second = Arc::new(Consumer::new(
        ConsumerConfig::default().with_topic(TOPIC).with_group_id(GROUP),
        log.reader(TOPIC, GROUP, StartOffset::Earliest),
        router(store.clone(), Duration::from_millis(5)),
        JsonCodec,
    ));
    let running = {
        let consumer = second.clone();
        tokio::spawn(async move { consumer.run(CancellationToken::new()).await })
    };
    wait_for_status(&store, record.id, Status::Completed).await;
    second.shutdown(&CancellationToken::new()).await.unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(log.committed_offset(GROUP, TOPIC), Some(1));
    assert_eq!(store.get(record.id).await.unwrap().status, Status::Completed);
}

#[tokio::test]
async fn rewound_reader_sees_uncommitted_event_again() {
    let log = Arc::new(InMemoryLog::new());
    let store = Arc::new(InMemoryTaskStore::new());
    let producer = Producer::new(ProducerConfig::default().with_topic(TOPIC), log.writer(), JsonCodec);
    let service = CreateTaskService::new(store, producer, SequentialIds::new());
    service.create(&CancellationToken::new(), "a").await.unwrap();

    let reader = log.reader(TOPIC, GROUP, StartOffset::Earliest);
    let first = reader.fetch_message().await.unwrap();
    reader.rewind();
    let again = reader.fetch_message().await.unwrap();

    assert_eq!(first, again);
}
