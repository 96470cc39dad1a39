//! Process settings loaded from `TASKFLOW_*` environment variables.
//!
//! Every variable is optional. Unset variables fall back to the library
//! defaults; set-but-unparsable variables are an error so a typo never
//! silently runs with a default.

use std::str::FromStr;
use std::time::Duration;

use taskflow_infra::{ConsumerConfig, ProducerConfig, RequiredAcks, StartOffset};
use thiserror::Error;
use tracing::warn;

pub const BROKER: &str = "TASKFLOW_BROKER";
pub const BROKERS: &str = "TASKFLOW_BROKERS";
pub const TOPIC: &str = "TASKFLOW_TOPIC";
pub const GROUP_ID: &str = "TASKFLOW_GROUP_ID";
pub const COMMIT_INTERVAL_MS: &str = "TASKFLOW_COMMIT_INTERVAL_MS";
pub const SESSION_TIMEOUT_MS: &str = "TASKFLOW_SESSION_TIMEOUT_MS";
pub const START_OFFSET: &str = "TASKFLOW_START_OFFSET";
pub const SHUTDOWN_TIMEOUT_MS: &str = "TASKFLOW_SHUTDOWN_TIMEOUT_MS";
pub const RETRY_AMOUNT: &str = "TASKFLOW_RETRY_AMOUNT";
pub const RETRY_BACKOFF_MS: &str = "TASKFLOW_RETRY_BACKOFF_MS";
pub const MAX_BACKOFF_MS: &str = "TASKFLOW_MAX_BACKOFF_MS";
pub const WORKER_COUNT: &str = "TASKFLOW_WORKER_COUNT";
pub const JOBS_MULTIPLIER: &str = "TASKFLOW_JOBS_MULTIPLIER";
pub const BATCH_TIMEOUT_MS: &str = "TASKFLOW_BATCH_TIMEOUT_MS";
pub const REQUIRED_ACKS: &str = "TASKFLOW_REQUIRED_ACKS";
pub const ALLOW_TOPIC_CREATION: &str = "TASKFLOW_ALLOW_TOPIC_CREATION";
pub const DEMO_TASKS: &str = "TASKFLOW_DEMO_TASKS";
pub const WORK_MS: &str = "TASKFLOW_WORK_MS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> SettingsError {
    SettingsError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Which durable log the worker talks to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BrokerKind {
    /// Single-process log; producer and consumer share it.
    #[default]
    Memory,
    Kafka,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub broker: BrokerKind,
    pub consumer: ConsumerConfig,
    pub producer: ProducerConfig,
    /// Tasks created at startup so the pipeline has something to do.
    pub demo_tasks: usize,
    /// Simulated processing time of the status update handler.
    pub work: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            broker: BrokerKind::Memory,
            consumer: ConsumerConfig::default(),
            producer: ProducerConfig::default(),
            demo_tasks: 0,
            work: taskflow_infra::usecase::update_status::DEFAULT_WORK,
        }
    }
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let mut settings = Self::default();

        if let Some(raw) = env.get(BROKER) {
            settings.broker = match raw.to_ascii_lowercase().as_str() {
                "memory" | "in-memory" => BrokerKind::Memory,
                "kafka" => BrokerKind::Kafka,
                _ => return Err(invalid(BROKER, &raw, "expected `memory` or `kafka`")),
            };
        }

        match env.get(BROKERS) {
            Some(raw) => {
                let brokers: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .map(str::to_string)
                    .collect();
                if brokers.is_empty() {
                    return Err(invalid(BROKERS, &raw, "no broker address given"));
                }
                settings.consumer.brokers = brokers.clone();
                settings.producer.brokers = brokers;
            }
            None if settings.broker == BrokerKind::Kafka => {
                warn!(
                    "{BROKERS} not set; using default {}",
                    settings.consumer.brokers.join(",")
                );
            }
            None => {}
        }

        if let Some(topic) = env.get(TOPIC) {
            settings.consumer.topic = topic.clone();
            settings.producer.topic = topic;
        }
        if let Some(group_id) = env.get(GROUP_ID) {
            settings.consumer.group_id = group_id;
        }

        let c = &mut settings.consumer;
        env.millis(COMMIT_INTERVAL_MS, &mut c.commit_interval)?;
        env.millis(SESSION_TIMEOUT_MS, &mut c.session_timeout)?;
        env.millis(SHUTDOWN_TIMEOUT_MS, &mut c.shutdown_timeout)?;
        env.millis(RETRY_BACKOFF_MS, &mut c.retry_backoff)?;
        if let Some(raw) = env.get(MAX_BACKOFF_MS) {
            let ms = raw.parse::<u64>().map_err(|e| invalid(MAX_BACKOFF_MS, &raw, e))?;
            c.max_backoff = Some(Duration::from_millis(ms));
        }
        env.parsed(RETRY_AMOUNT, &mut c.retry_amount)?;
        env.parsed(WORKER_COUNT, &mut c.worker_count)?;
        env.parsed(JOBS_MULTIPLIER, &mut c.jobs_multiplier)?;
        if let Some(raw) = env.get(START_OFFSET) {
            c.start_offset = match raw.to_ascii_lowercase().as_str() {
                "earliest" | "first" => StartOffset::Earliest,
                "latest" | "last" => StartOffset::Latest,
                _ => return Err(invalid(START_OFFSET, &raw, "expected `earliest` or `latest`")),
            };
        }

        let p = &mut settings.producer;
        env.millis(BATCH_TIMEOUT_MS, &mut p.batch_timeout)?;
        env.parsed(ALLOW_TOPIC_CREATION, &mut p.allow_topic_creation)?;
        if let Some(raw) = env.get(REQUIRED_ACKS) {
            p.required_acks = match raw.to_ascii_lowercase().as_str() {
                "none" | "0" => RequiredAcks::None,
                "leader" | "one" | "1" => RequiredAcks::Leader,
                "all" | "-1" => RequiredAcks::All,
                _ => return Err(invalid(REQUIRED_ACKS, &raw, "expected `none`, `leader` or `all`")),
            };
        }

        env.parsed(DEMO_TASKS, &mut settings.demo_tasks)?;
        env.millis(WORK_MS, &mut settings.work)?;

        settings.consumer = settings.consumer.normalized();
        Ok(settings)
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, key: &'static str, slot: &mut T) -> Result<(), SettingsError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = self.get(key) {
            *slot = raw.parse().map_err(|e| invalid(key, &raw, e))?;
        }
        Ok(())
    }

    fn millis(&self, key: &'static str, slot: &mut Duration) -> Result<(), SettingsError> {
        let mut ms = slot.as_millis() as u64;
        self.parsed(key, &mut ms)?;
        *slot = Duration::from_millis(ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<WorkerSettings, SettingsError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s, WorkerSettings::default());
    }

    #[test]
    fn reads_the_flat_surface() {
        let s = settings(&[
            (BROKER, "kafka"),
            (BROKERS, "k1:9092, k2:9092"),
            (TOPIC, "jobs"),
            (GROUP_ID, "updaters"),
            (SHUTDOWN_TIMEOUT_MS, "250"),
            (RETRY_AMOUNT, "5"),
            (WORKER_COUNT, "4"),
            (JOBS_MULTIPLIER, "3"),
            (START_OFFSET, "latest"),
            (REQUIRED_ACKS, "all"),
            (MAX_BACKOFF_MS, "30000"),
        ])
        .unwrap();

        assert_eq!(s.broker, BrokerKind::Kafka);
        assert_eq!(s.consumer.brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(s.producer.brokers, s.consumer.brokers);
        assert_eq!(s.producer.topic, "jobs");
        assert_eq!(s.consumer.group_id, "updaters");
        assert_eq!(s.consumer.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(s.consumer.retry_amount, 5);
        assert_eq!(s.consumer.queue_capacity(), 12);
        assert_eq!(s.consumer.start_offset, StartOffset::Latest);
        assert_eq!(s.producer.required_acks, RequiredAcks::All);
        assert_eq!(s.consumer.max_backoff, Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_workers_are_coerced_to_one() {
        let s = settings(&[(WORKER_COUNT, "0"), (JOBS_MULTIPLIER, "0")]).unwrap();
        assert_eq!(s.consumer.worker_count, 1);
        assert_eq!(s.consumer.jobs_multiplier, 1);
    }

    #[test]
    fn unparsable_values_are_rejected() {
        let err = settings(&[(RETRY_AMOUNT, "lots")]).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: RETRY_AMOUNT, .. }));

        let err = settings(&[(WORKER_COUNT, "-2")]).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: WORKER_COUNT, .. }));

        let err = settings(&[(START_OFFSET, "middle")]).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: START_OFFSET, .. }));
    }
}
