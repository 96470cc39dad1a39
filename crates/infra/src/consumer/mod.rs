//! Log consumer: fetch loop + bounded worker pool.
//!
//! ## Pipeline
//!
//! ```text
//! Reader::fetch_message → bounded job queue → N workers → Decode → Handle::pick → commit
//! ```
//!
//! - The queue holds `worker_count × jobs_multiplier` messages. The fetch loop
//!   reserves a slot **before** fetching, so a full queue throttles intake to
//!   the pool's processing rate. This is the only backpressure mechanism.
//! - Offsets are committed only after the handler succeeds (at-least-once).
//!   Failed messages stay uncommitted and come back on the next assignment,
//!   so handlers must be idempotent.
//! - With more than one worker, completion order is not guaranteed. Use a
//!   single worker when per-key ordering matters.
//!
//! ## Cancellation
//!
//! Two independent scopes:
//!
//! - fetch scope: the token passed to [`Consumer::run`] plus the internal
//!   shutdown token. Ends intake.
//! - worker scope: canceled only when a [`Consumer::shutdown`] grace period
//!   runs out, so workers always get more time than the fetch loop.
//!
//! ## Lifecycle
//!
//! `Idle → Running → Draining → Closed`, with no way back from `Closed`.

mod backoff;
mod error;
mod worker;

pub use backoff::Backoff;
pub use error::ConsumerError;

use std::error::Error as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskflow_events::{Decode, Handle, Message};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, info, warn};

use crate::broker::Reader;
use crate::config::ConsumerConfig;
use worker::Worker;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Running,
    Draining,
    Closed,
}

pub struct Consumer<R, H, D> {
    config: ConsumerConfig,
    reader: Arc<R>,
    handler: Arc<H>,
    decoder: Arc<D>,

    state: Mutex<ConsumerState>,
    /// Ends the fetch loop without an error.
    stop_fetching: CancellationToken,
    /// Interrupts in-flight handler calls.
    stop_workers: CancellationToken,
    drained: watch::Sender<bool>,
    /// Set once the reader has been closed.
    closed: watch::Sender<bool>,
}

impl<R, H, D> core::fmt::Debug for Consumer<R, H, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Consumer")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<R, H, D> Consumer<R, H, D> {
    /// Build a consumer. `config` is normalized (see
    /// [`ConsumerConfig::normalized`]) and frozen here.
    pub fn new(config: ConsumerConfig, reader: R, handler: H, decoder: D) -> Self {
        let (drained, _) = watch::channel(false);
        let (closed, _) = watch::channel(false);
        Self {
            config: config.normalized(),
            reader: Arc::new(reader),
            handler: Arc::new(handler),
            decoder: Arc::new(decoder),
            state: Mutex::new(ConsumerState::Idle),
            stop_fetching: CancellationToken::new(),
            stop_workers: CancellationToken::new(),
            drained,
            closed,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Current lifecycle state.
    ///
    /// A run that ended on its own (cancellation, exhausted retries) leaves
    /// the consumer `Running` until [`shutdown`](Consumer::shutdown) is called.
    pub fn state(&self) -> ConsumerState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, ConsumerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, H, D> Consumer<R, H, D>
where
    R: Reader + 'static,
    H: Handle + 'static,
    D: Decode + 'static,
{
    /// Consume until the fetch loop terminates.
    ///
    /// Returns `Ok(())` only when the loop ended because of [`shutdown`]; a
    /// fired `cancel` yields [`ConsumerError::OperationCanceled`] and an
    /// exhausted retry budget yields [`ConsumerError::TooManyRetries`].
    /// Queued messages are drained by the workers before this returns.
    ///
    /// [`shutdown`]: Consumer::shutdown
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        {
            let mut state = self.lock_state();
            match *state {
                ConsumerState::Idle => *state = ConsumerState::Running,
                ConsumerState::Running => return Err(ConsumerError::AlreadyRunning),
                ConsumerState::Draining | ConsumerState::Closed => {
                    return Err(ConsumerError::ConsumerAlreadyClosed);
                }
            }
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Message>(self.config.queue_capacity());
        let jobs = Arc::new(tokio::sync::Mutex::new(jobs_rx));

        let mut workers = JoinSet::new();
        for id in 0..self.config.worker_count {
            let worker = Worker {
                id,
                reader: Arc::clone(&self.reader),
                handler: Arc::clone(&self.handler),
                decoder: Arc::clone(&self.decoder),
                cancel: self.stop_workers.clone(),
            };
            workers.spawn(worker.run(Arc::clone(&jobs)));
        }
        // Only workers hold the receiver: once they all stop, reserving fails.
        drop(jobs);

        info!(
            topic = %self.config.topic,
            group_id = %self.config.group_id,
            workers = self.config.worker_count,
            queue_capacity = self.config.queue_capacity(),
            "consumer started"
        );

        // Dropping the sender when the loop returns closes the queue.
        let result = self.fetch_loop(&cancel, jobs_tx).await;

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "consumer worker panicked");
            }
        }
        self.drained.send_replace(true);

        match &result {
            Ok(()) => info!("consumer stopped"),
            Err(err) if err.is_canceled() => info!("consumer canceled"),
            Err(err) => error!(
                error = %err,
                cause = err.source().map(field::display),
                "consumer terminated"
            ),
        }
        result
    }

    async fn fetch_loop(
        &self,
        cancel: &CancellationToken,
        jobs: mpsc::Sender<Message>,
    ) -> Result<(), ConsumerError> {
        let mut backoff = Backoff::new(self.config.retry_backoff, self.config.max_backoff);
        let mut failures: u32 = 0;

        loop {
            if self.stop_fetching.is_cancelled() {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(ConsumerError::OperationCanceled);
            }

            let delay = backoff.current();
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.stop_fetching.cancelled() => return Ok(()),
                    _ = cancel.cancelled() => return Err(ConsumerError::OperationCanceled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let slot = tokio::select! {
                biased;
                _ = self.stop_fetching.cancelled() => return Ok(()),
                _ = cancel.cancelled() => return Err(ConsumerError::OperationCanceled),
                slot = jobs.reserve() => slot,
            };
            let Ok(slot) = slot else {
                warn!("job queue closed because every worker stopped");
                return Err(ConsumerError::OperationCanceled);
            };

            let fetched = tokio::select! {
                biased;
                _ = self.stop_fetching.cancelled() => return Ok(()),
                _ = cancel.cancelled() => return Err(ConsumerError::OperationCanceled),
                fetched = self.reader.fetch_message() => fetched,
            };

            match fetched {
                Ok(message) => {
                    failures = 0;
                    backoff.reset();
                    debug!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        "message fetched"
                    );
                    slot.send(message);
                }
                Err(err) if err.is_canceled() => return Err(ConsumerError::OperationCanceled),
                Err(err) if err.is_closed() => {
                    error!("reader closed underneath the fetch loop");
                    return Err(ConsumerError::ConsumerAlreadyClosed);
                }
                Err(err) => {
                    failures += 1;
                    if failures > self.config.retry_amount {
                        error!(attempts = failures, error = %err, "fetch retry budget exhausted");
                        return Err(ConsumerError::TooManyRetries {
                            attempts: failures,
                            last: err,
                        });
                    }
                    let delay = backoff.advance();
                    let err = ConsumerError::FetchingFailure(err);
                    warn!(
                        attempt = failures,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        cause = err.source().map(field::display),
                        "fetch failed; backing off"
                    );
                }
            }
        }
    }

    /// Stop intake, let workers drain, then close the reader.
    ///
    /// Workers get until `cancel` fires or the configured shutdown timeout
    /// elapses, whichever comes first. After that their scope is canceled and
    /// this returns without waiting for in-flight handlers; their messages stay
    /// uncommitted. The reader is closed in every case, exactly once: a call
    /// that overlaps a shutdown already in progress waits for it to finish and
    /// returns [`ConsumerError::ConsumerAlreadyClosed`].
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), ConsumerError> {
        let previous = {
            let mut state = self.lock_state();
            let previous = *state;
            if previous == ConsumerState::Closed {
                return Err(ConsumerError::ConsumerAlreadyClosed);
            }
            *state = ConsumerState::Draining;
            previous
        };
        if previous == ConsumerState::Draining {
            debug!("shutdown already in progress; waiting for it");
            wait_until_set(self.closed.subscribe()).await;
            return Err(ConsumerError::ConsumerAlreadyClosed);
        }
        info!(from = ?previous, "consumer shutting down");

        self.stop_fetching.cancel();

        if previous != ConsumerState::Idle {
            let drained = wait_until_set(self.drained.subscribe());
            tokio::select! {
                _ = drained => info!("consumer workers drained"),
                _ = cancel.cancelled() => {
                    warn!("shutdown canceled before workers drained; canceling in-flight work");
                    self.stop_workers.cancel();
                }
                _ = tokio::time::sleep(self.config.shutdown_timeout) => {
                    warn!(
                        timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                        "shutdown grace period elapsed; canceling in-flight work"
                    );
                    self.stop_workers.cancel();
                }
            }
        }

        let closed = self.reader.close().await;
        *self.lock_state() = ConsumerState::Closed;
        self.closed.send_replace(true);

        match closed {
            Ok(()) => {
                info!("consumer closed");
                Ok(())
            }
            Err(err) if err.is_closed() => Err(ConsumerError::ConsumerAlreadyClosed),
            Err(err) => {
                let err = ConsumerError::ClosingConsumer(err);
                error!(
                    error = %err,
                    cause = err.source().map(field::display),
                    "failed to close reader"
                );
                Err(err)
            }
        }
    }
}

async fn wait_until_set(mut flag: watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        if flag.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use taskflow_events::{JsonCodec, Router};

    use crate::broker::InMemoryLog;
    use crate::config::StartOffset;

    fn consumer(log: &Arc<InMemoryLog>) -> Consumer<crate::broker::InMemoryReader, Router, JsonCodec> {
        let config = ConsumerConfig::default().with_topic("t").with_group_id("g");
        Consumer::new(
            config,
            log.reader("t", "g", StartOffset::Earliest),
            Router::new(),
            JsonCodec,
        )
    }

    #[test]
    fn new_consumer_is_idle_with_normalized_config() {
        let log = Arc::new(InMemoryLog::new());
        let config = ConsumerConfig::default().with_workers(0, 0);
        let c = Consumer::new(
            config,
            log.reader("t", "g", StartOffset::Earliest),
            Router::new(),
            JsonCodec,
        );
        assert_eq!(c.state(), ConsumerState::Idle);
        assert_eq!(c.config().worker_count, 1);
        assert_eq!(c.config().jobs_multiplier, 1);
    }

    #[tokio::test]
    async fn shutdown_of_idle_consumer_closes_reader() {
        let log = Arc::new(InMemoryLog::new());
        let c = consumer(&log);

        c.shutdown(&CancellationToken::new()).await.unwrap();
        assert_eq!(c.state(), ConsumerState::Closed);
        assert!(c.reader.is_closed());

        let again = c.shutdown(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(again, ConsumerError::ConsumerAlreadyClosed));
    }

    #[tokio::test]
    async fn run_after_shutdown_is_rejected() {
        let log = Arc::new(InMemoryLog::new());
        let c = consumer(&log);
        c.shutdown(&CancellationToken::new()).await.unwrap();

        let err = c.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ConsumerError::ConsumerAlreadyClosed));
    }

    #[tokio::test]
    async fn second_run_while_running_is_rejected() {
        let log = Arc::new(InMemoryLog::new());
        let c = Arc::new(consumer(&log));

        let running = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.run(CancellationToken::new()).await })
        };
        while c.state() != ConsumerState::Running {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let err = c.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ConsumerError::AlreadyRunning));

        c.shutdown(&CancellationToken::new()).await.unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn caller_cancellation_ends_run_with_operation_canceled() {
        let log = Arc::new(InMemoryLog::new());
        let c = consumer(&log);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(1), c.run(cancel))
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(c.state(), ConsumerState::Running);

        let again = c.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(again, ConsumerError::AlreadyRunning));

        c.shutdown(&CancellationToken::new()).await.unwrap();
        assert_eq!(c.state(), ConsumerState::Closed);
    }
}
