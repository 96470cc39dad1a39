//! Worker side of the consumer pool.

use std::error::Error as _;
use std::ops::ControlFlow;
use std::sync::Arc;

use taskflow_events::{Decode, Handle, Message};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, warn};

use super::error::ConsumerError;
use crate::broker::Reader;

/// Receiving half of the job queue, shared by every worker.
pub(super) type JobQueue = Arc<Mutex<mpsc::Receiver<Message>>>;

pub(super) struct Worker<R, H, D> {
    pub(super) id: usize,
    pub(super) reader: Arc<R>,
    pub(super) handler: Arc<H>,
    pub(super) decoder: Arc<D>,
    /// Fires only when a shutdown grace period runs out.
    pub(super) cancel: CancellationToken,
}

impl<R, H, D> Worker<R, H, D>
where
    R: Reader,
    H: Handle,
    D: Decode,
{
    /// Drain the queue until it is closed and empty, or until canceled.
    pub(super) async fn run(self, jobs: JobQueue) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                message = recv(&jobs) => message,
            };
            let Some(message) = next else {
                break;
            };
            if self.process(message).await.is_break() {
                break;
            }
        }
        debug!(worker = self.id, "consumer worker stopped");
    }

    async fn process(&self, message: Message) -> ControlFlow<()> {
        let event = match self.decoder.decode(message.value()) {
            Ok(event) => event,
            Err(err) => {
                // Poison: no retry, no commit, no dead-letter path.
                warn!(
                    worker = self.id,
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %err,
                    "dropping undecodable message"
                );
                return ControlFlow::Continue(());
            }
        };

        if let Err(err) = self.handler.pick(&self.cancel, event.action(), &event).await {
            if err.is_canceled() {
                debug!(worker = self.id, task_id = %event.id(), "handler canceled; worker stopping");
                return ControlFlow::Break(());
            }
            error!(
                worker = self.id,
                task_id = %event.id(),
                offset = message.offset(),
                error = %err,
                cause = err.source().map(field::display),
                "failed to process message; leaving offset uncommitted"
            );
            return ControlFlow::Continue(());
        }

        let committed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return ControlFlow::Break(()),
            res = self.reader.commit_messages(std::slice::from_ref(&message)) => res,
        };
        match committed {
            Ok(()) => {
                debug!(worker = self.id, task_id = %event.id(), offset = message.offset(), "message committed");
                ControlFlow::Continue(())
            }
            Err(err) if err.is_canceled() => ControlFlow::Break(()),
            Err(err) => {
                let err = ConsumerError::CommittingFailure(err);
                warn!(
                    worker = self.id,
                    offset = message.offset(),
                    error = %err,
                    cause = err.source().map(field::display),
                    "commit failed"
                );
                ControlFlow::Continue(())
            }
        }
    }
}

async fn recv(jobs: &Mutex<mpsc::Receiver<Message>>) -> Option<Message> {
    jobs.lock().await.recv().await
}
