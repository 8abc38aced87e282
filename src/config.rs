//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the orchestrator and its worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of long-lived worker loops.
    pub max_workers: usize,

    /// Global cap on concurrently running task executions.
    pub max_concurrent_tasks: usize,

    /// Interval of the background dependency sweep.
    #[serde(with = "serde_millis")]
    pub resolver_interval: Duration,

    /// Interval at which workflow execution polls member statuses.
    #[serde(with = "serde_millis")]
    pub poll_interval: Duration,

    /// How long an idle worker waits on the queue before re-checking the
    /// shutdown flag.
    #[serde(with = "serde_millis")]
    pub dequeue_timeout: Duration,

    /// Back-off after a worker re-enqueues a task because the concurrency
    /// cap was reached.
    #[serde(with = "serde_millis")]
    pub saturation_backoff: Duration,

    /// How long shutdown waits for in-flight tasks before aborting them.
    #[serde(with = "serde_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            max_concurrent_tasks: 50,
            resolver_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            dequeue_timeout: Duration::from_millis(100),
            saturation_backoff: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker loops.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the global concurrency cap.
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Set the dependency sweep interval.
    pub fn with_resolver_interval(mut self, interval: Duration) -> Self {
        self.resolver_interval = interval;
        self
    }

    /// Set the workflow poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the worker dequeue timeout.
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Serde helper serializing Duration as milliseconds.
mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();

        assert_eq!(config.max_workers, 10);
        assert_eq!(config.max_concurrent_tasks, 50);
        assert_eq!(config.resolver_interval, Duration::from_secs(1));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_builder_overrides() {
        let config = OrchestratorConfig::new()
            .with_max_workers(2)
            .with_max_concurrent_tasks(4)
            .with_poll_interval(Duration::from_millis(10));

        assert_eq!(config.max_workers, 2);
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_config_deserialization_with_partial_fields() {
        let json = r#"{"max_workers": 3, "resolver_interval": 250}"#;
        let config: OrchestratorConfig = serde_json::from_str(json).expect("deserialize");

        assert_eq!(config.max_workers, 3);
        assert_eq!(config.resolver_interval, Duration::from_millis(250));
        // Unspecified fields keep their defaults.
        assert_eq!(config.max_concurrent_tasks, 50);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = OrchestratorConfig::new().with_dequeue_timeout(Duration::from_millis(42));
        let json = serde_json::to_string(&config).expect("serialize");
        let back: OrchestratorConfig = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(config, back);
    }
}
