use crate::core::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the change engine.
///
/// Durations are stored as milliseconds so a config can be loaded from JSON:
///
/// ```
/// # use revlock::EngineConfig;
/// let config = EngineConfig::from_json_str(r#"{ "heartbeat_timeout_ms": 5000 }"#).unwrap();
/// assert_eq!(config.heartbeat_timeout().as_millis(), 5000);
/// assert_eq!(config.wait_initial().as_millis(), 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// A non-terminal change whose owner has been silent this long may be
    /// rolled forward or failed by any other writer.
    pub heartbeat_timeout_ms: u64,

    /// First backoff step while waiting on a conflicting predecessor.
    pub wait_initial_ms: u64,

    /// Backoff ceiling while waiting on a conflicting predecessor.
    pub wait_max_ms: u64,

    /// Compare-and-swap attempts on one record before giving up.
    pub max_cas_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 30_000,
            wait_initial_ms: 10,
            wait_max_ms: 1_000,
            max_cas_retries: 64,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn wait_initial(&self) -> Duration {
        Duration::from_millis(self.wait_initial_ms)
    }

    pub fn wait_max(&self) -> Duration {
        Duration::from_millis(self.wait_max_ms)
    }

    /// Set the heartbeat timeout
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the first backoff step
    pub fn with_wait_initial(mut self, wait: Duration) -> Self {
        self.wait_initial_ms = wait.as_millis() as u64;
        self
    }

    /// Set the backoff ceiling
    pub fn with_wait_max(mut self, wait: Duration) -> Self {
        self.wait_max_ms = wait.as_millis() as u64;
        self
    }

    /// Set the compare-and-swap retry budget
    pub fn with_max_cas_retries(mut self, retries: u32) -> Self {
        self.max_cas_retries = retries;
        self
    }

    /// Backoff for the given 1-based poll attempt: doubles from
    /// `wait_initial` and saturates at `wait_max`.
    pub fn wait_backoff(&self, attempt: u32) -> Duration {
        let base = self.wait_initial_ms.max(1);
        let max = self.wait_max_ms.max(base);
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(base.saturating_mul(factor).min(max))
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout_ms == 0 {
            return Err(EngineError::Config(
                "heartbeat_timeout_ms must be positive".to_string(),
            ));
        }
        if self.wait_initial_ms == 0 {
            return Err(EngineError::Config(
                "wait_initial_ms must be positive".to_string(),
            ));
        }
        if self.wait_max_ms < self.wait_initial_ms {
            return Err(EngineError::Config(format!(
                "wait_max_ms ({}) is below wait_initial_ms ({})",
                self.wait_max_ms, self.wait_initial_ms
            )));
        }
        // A waiter refreshes its heartbeat between polls, so one backoff
        // interval must fit inside the timeout
        if self.wait_max_ms >= self.heartbeat_timeout_ms {
            return Err(EngineError::Config(format!(
                "wait_max_ms ({}) must be below heartbeat_timeout_ms ({})",
                self.wait_max_ms, self.heartbeat_timeout_ms
            )));
        }
        if self.max_cas_retries == 0 {
            return Err(EngineError::Config(
                "max_cas_retries must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
