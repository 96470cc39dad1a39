use thiserror::Error;

use crate::broker::BrokerError;

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The caller's cancellation ended the fetch loop.
    #[error("consumer: operation canceled")]
    OperationCanceled,

    #[error("consumer: failed while trying to fetch new messages")]
    FetchingFailure(#[source] BrokerError),

    #[error("consumer: failed to commit offset")]
    CommittingFailure(#[source] BrokerError),

    /// Consecutive fetch failures exceeded the retry budget.
    #[error("consumer: too many retries ({attempts} consecutive fetch failures)")]
    TooManyRetries {
        attempts: u32,
        #[source]
        last: BrokerError,
    },

    #[error("consumer: consumer group is closed already")]
    ConsumerAlreadyClosed,

    #[error("consumer: failed to close consumer")]
    ClosingConsumer(#[source] BrokerError),

    /// `run` was already called. A finished run still counts until shutdown.
    #[error("consumer: already started; shut it down instead of running again")]
    AlreadyRunning,
}

impl ConsumerError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ConsumerError::OperationCanceled)
    }

    /// Errors the process supervisor should treat as fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsumerError::TooManyRetries { .. } | ConsumerError::ConsumerAlreadyClosed
        )
    }
}
