//! `taskflow-worker`: process wiring for the task pipeline.
//!
//! Builds the store, log, producer, router and consumer from
//! [`WorkerSettings`], optionally seeds demo tasks, and runs until the process
//! is asked to stop.

pub mod pipeline;
pub mod settings;

pub use pipeline::Pipeline;
pub use settings::{BrokerKind, SettingsError, WorkerSettings};

use std::future::Future;

use tracing::{info, warn};

/// Run the worker with `settings` until `stop` resolves.
pub async fn run<F>(settings: WorkerSettings, stop: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    info!(
        broker = ?settings.broker,
        topic = %settings.consumer.topic,
        group_id = %settings.consumer.group_id,
        workers = settings.consumer.worker_count,
        "starting task worker"
    );

    match settings.broker {
        BrokerKind::Memory => {
            let pipeline = Pipeline::in_memory(&settings);
            pipeline.seed(settings.demo_tasks).await?;
            pipeline.run_until(stop).await
        }
        #[cfg(feature = "kafka")]
        BrokerKind::Kafka => {
            let pipeline = Pipeline::kafka(&settings)?;
            pipeline.seed(settings.demo_tasks).await?;
            pipeline.run_until(stop).await
        }
        #[cfg(not(feature = "kafka"))]
        BrokerKind::Kafka => {
            anyhow::bail!("kafka broker requested but the `kafka` feature is not enabled")
        }
    }
}

/// Resolves on ctrl-c.
///
/// If the signal handler cannot be installed this never resolves, leaving
/// fatal consumer errors as the only way out.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received ctrl-c"),
        Err(err) => {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
