//! Queue configuration
//!
//! Tuning values for fetch sizing, runner bounds and sleep/idle periods.
//! A [`QueueConfig`] is built once and never changes while a queue runs.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scaling worker queue configuration
///
/// # Example
///
/// ```
/// use scaling_queue::QueueConfig;
/// use std::time::Duration;
///
/// let config = QueueConfig::new()
///     .with_runner_bounds(1, 3)
///     .with_count_of_elements_per_runner(2)
///     .with_runner_max_idle_period(Duration::from_secs(5));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.fetch_quota(3), 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Identifier used in thread names and log fields
    pub queue_id: String,

    /// Increment the dispatcher (and idle runners) sleep between checks
    #[serde(with = "duration_millis")]
    pub dispatcher_sleep_period: Duration,

    /// How long the dispatcher waits after a fetch that added nothing
    #[serde(with = "duration_millis")]
    pub dispatcher_wait_period_on_empty_fetch: Duration,

    /// Pending items one runner is expected to handle
    pub count_of_elements_per_runner: usize,

    /// Lower bound of the quota requested from the supplier
    pub min_elements_count_to_supply: usize,

    /// Items requested beyond what the current runners need; also the
    /// pending-set size at which the dispatcher throttles
    pub spare_elements_count_to_supply: usize,

    /// Runners that never retire from idleness
    pub min_runner_count: usize,

    /// Upper bound of live runners
    pub max_runner_count: usize,

    /// How long an idle runner sleeps before claiming again
    #[serde(with = "duration_millis")]
    pub runner_sleep_idle_period: Duration,

    /// Idle time after which an ephemeral runner retires
    #[serde(with = "duration_millis")]
    pub runner_max_idle_period: Duration,

    /// Dispatcher sleep periods to back off after a failed fetch cycle
    pub sleep_period_count_on_error: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_id: format!("queue-{}", Uuid::now_v7()),
            dispatcher_sleep_period: Duration::from_millis(500),
            dispatcher_wait_period_on_empty_fetch: Duration::from_millis(500),
            count_of_elements_per_runner: 2,
            min_elements_count_to_supply: 10,
            spare_elements_count_to_supply: 2,
            min_runner_count: 1,
            max_runner_count: 10,
            runner_sleep_idle_period: Duration::from_millis(500),
            runner_max_idle_period: Duration::from_secs(30),
            sleep_period_count_on_error: 10,
        }
    }
}

impl QueueConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables (unset or unparsable values keep the default):
    /// - `SWQ_QUEUE_ID`
    /// - `SWQ_DISPATCHER_SLEEP_MS`
    /// - `SWQ_DISPATCHER_WAIT_ON_EMPTY_FETCH_MS`
    /// - `SWQ_ELEMENTS_PER_RUNNER`
    /// - `SWQ_MIN_ELEMENTS_TO_SUPPLY`
    /// - `SWQ_SPARE_ELEMENTS_TO_SUPPLY`
    /// - `SWQ_MIN_RUNNER_COUNT`
    /// - `SWQ_MAX_RUNNER_COUNT`
    /// - `SWQ_RUNNER_SLEEP_IDLE_MS`
    /// - `SWQ_RUNNER_MAX_IDLE_MS`
    /// - `SWQ_SLEEP_PERIODS_ON_ERROR`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_id: std::env::var("SWQ_QUEUE_ID").unwrap_or(defaults.queue_id),
            dispatcher_sleep_period: env_millis("SWQ_DISPATCHER_SLEEP_MS")
                .unwrap_or(defaults.dispatcher_sleep_period),
            dispatcher_wait_period_on_empty_fetch: env_millis(
                "SWQ_DISPATCHER_WAIT_ON_EMPTY_FETCH_MS",
            )
            .unwrap_or(defaults.dispatcher_wait_period_on_empty_fetch),
            count_of_elements_per_runner: env_parse("SWQ_ELEMENTS_PER_RUNNER")
                .unwrap_or(defaults.count_of_elements_per_runner),
            min_elements_count_to_supply: env_parse("SWQ_MIN_ELEMENTS_TO_SUPPLY")
                .unwrap_or(defaults.min_elements_count_to_supply),
            spare_elements_count_to_supply: env_parse("SWQ_SPARE_ELEMENTS_TO_SUPPLY")
                .unwrap_or(defaults.spare_elements_count_to_supply),
            min_runner_count: env_parse("SWQ_MIN_RUNNER_COUNT")
                .unwrap_or(defaults.min_runner_count),
            max_runner_count: env_parse("SWQ_MAX_RUNNER_COUNT")
                .unwrap_or(defaults.max_runner_count),
            runner_sleep_idle_period: env_millis("SWQ_RUNNER_SLEEP_IDLE_MS")
                .unwrap_or(defaults.runner_sleep_idle_period),
            runner_max_idle_period: env_millis("SWQ_RUNNER_MAX_IDLE_MS")
                .unwrap_or(defaults.runner_max_idle_period),
            sleep_period_count_on_error: env_parse("SWQ_SLEEP_PERIODS_ON_ERROR")
                .unwrap_or(defaults.sleep_period_count_on_error),
        }
    }

    /// Set the queue identifier
    pub fn with_queue_id(mut self, id: impl Into<String>) -> Self {
        self.queue_id = id.into();
        self
    }

    /// Set the dispatcher sleep increment
    pub fn with_dispatcher_sleep_period(mut self, period: Duration) -> Self {
        self.dispatcher_sleep_period = period;
        self
    }

    /// Set the wait after a fetch that added nothing
    pub fn with_dispatcher_wait_period_on_empty_fetch(mut self, period: Duration) -> Self {
        self.dispatcher_wait_period_on_empty_fetch = period;
        self
    }

    /// Set the number of pending items per runner
    pub fn with_count_of_elements_per_runner(mut self, count: usize) -> Self {
        self.count_of_elements_per_runner = count;
        self
    }

    /// Set the minimum quota requested from the supplier
    pub fn with_min_elements_count_to_supply(mut self, count: usize) -> Self {
        self.min_elements_count_to_supply = count;
        self
    }

    /// Set the spare items requested beyond the runners' needs
    pub fn with_spare_elements_count_to_supply(mut self, count: usize) -> Self {
        self.spare_elements_count_to_supply = count;
        self
    }

    /// Set the mandatory floor and the upper bound of runners
    pub fn with_runner_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_runner_count = min;
        self.max_runner_count = max;
        self
    }

    /// Set how long idle runners sleep between claims
    pub fn with_runner_sleep_idle_period(mut self, period: Duration) -> Self {
        self.runner_sleep_idle_period = period;
        self
    }

    /// Set the idle time after which ephemeral runners retire
    pub fn with_runner_max_idle_period(mut self, period: Duration) -> Self {
        self.runner_max_idle_period = period;
        self
    }

    /// Set the number of sleep periods to back off after a failed fetch cycle
    pub fn with_sleep_period_count_on_error(mut self, count: u32) -> Self {
        self.sleep_period_count_on_error = count;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher_sleep_period.is_zero() {
            return Err(ConfigError::Invalid(
                "dispatcher_sleep_period must be greater than zero".into(),
            ));
        }
        if self.runner_sleep_idle_period.is_zero() {
            return Err(ConfigError::Invalid(
                "runner_sleep_idle_period must be greater than zero".into(),
            ));
        }
        if self.count_of_elements_per_runner == 0 {
            return Err(ConfigError::Invalid(
                "count_of_elements_per_runner must be at least 1".into(),
            ));
        }
        if self.spare_elements_count_to_supply == 0 {
            return Err(ConfigError::Invalid(
                "spare_elements_count_to_supply must be at least 1".into(),
            ));
        }
        if self.max_runner_count == 0 {
            return Err(ConfigError::Invalid(
                "max_runner_count must be at least 1".into(),
            ));
        }
        if self.min_runner_count > self.max_runner_count {
            return Err(ConfigError::Invalid(
                "min_runner_count must not exceed max_runner_count".into(),
            ));
        }
        Ok(())
    }

    /// Number of items to request from the supplier with `runners` live runners
    pub fn fetch_quota(&self, runners: usize) -> usize {
        let needed = self
            .count_of_elements_per_runner
            .saturating_mul(runners)
            .saturating_add(self.spare_elements_count_to_supply);
        self.min_elements_count_to_supply.max(needed)
    }

    /// Runner count to scale up to after a fetch returned `fetched` items
    ///
    /// Floor division of the fetched count by the items per runner, kept
    /// within the configured runner bounds.
    pub fn scale_target(&self, fetched: usize) -> usize {
        (fetched / self.count_of_elements_per_runner.max(1))
            .min(self.max_runner_count)
            .max(self.min_runner_count)
    }

    /// Whether the runner with this ordinal belongs to the mandatory floor
    pub fn is_mandatory(&self, ordinal: usize) -> bool {
        ordinal < self.min_runner_count
    }

    /// Total backoff after a failed fetch cycle
    pub fn error_backoff(&self) -> Duration {
        self.dispatcher_sleep_period
            .saturating_mul(self.sleep_period_count_on_error)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of its allowed range
    #[error("invalid queue configuration: {0}")]
    Invalid(String),
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse(name).map(Duration::from_millis)
}

/// Serde support for Duration as milliseconds
mod duration_millis {
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
