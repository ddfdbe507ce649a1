//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max dispatches per rate window
    #[serde(rename = "requests-per-window", default = "default_requests_per_window")]
    pub requests_per_window: u32,

    /// Rate limit window duration in seconds
    #[serde(rename = "window-secs", default = "default_window_secs")]
    pub window_secs: u64,

    /// Pause after the API signals a rate limit
    #[serde(rename = "rate-limit-cooldown-ms", default = "default_rate_limit_cooldown_ms")]
    pub rate_limit_cooldown_ms: u64,

    /// Pause between consecutive dispatches
    #[serde(rename = "inter-request-delay-ms", default = "default_inter_request_delay_ms")]
    pub inter_request_delay_ms: u64,

    /// Extra wait added when throttling so the oldest call is surely out of the window
    #[serde(rename = "guard-buffer-ms", default = "default_guard_buffer_ms")]
    pub guard_buffer_ms: u64,

    /// Give up on a request after this many rate-limited attempts (unset: never)
    #[serde(
        rename = "max-rate-limit-retries",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_rate_limit_retries: Option<u32>,
}

fn default_requests_per_window() -> u32 {
    3
}

fn default_window_secs() -> u64 {
    60
}

fn default_rate_limit_cooldown_ms() -> u64 {
    15_000
}

fn default_inter_request_delay_ms() -> u64 {
    500
}

fn default_guard_buffer_ms() -> u64 {
    100
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
            rate_limit_cooldown_ms: default_rate_limit_cooldown_ms(),
            inter_request_delay_ms: default_inter_request_delay_ms(),
            guard_buffer_ms: default_guard_buffer_ms(),
            max_rate_limit_retries: None,
        }
    }
}

impl SchedulerConfig {
    /// Get the rate window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }

    pub fn guard_buffer(&self) -> Duration {
        Duration::from_millis(self.guard_buffer_ms)
    }

    /// Reject settings under which no request could ever be dispatched
    pub fn validate(&self) -> eyre::Result<()> {
        if self.requests_per_window == 0 {
            return Err(eyre::eyre!("scheduler.requests-per-window must be at least 1"));
        }
        if self.window_secs == 0 {
            return Err(eyre::eyre!("scheduler.window-secs must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.requests_per_window, 3);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.rate_limit_cooldown(), Duration::from_secs(15));
        assert_eq!(config.inter_request_delay(), Duration::from_millis(500));
        assert_eq!(config.guard_buffer(), Duration::from_millis(100));
        assert_eq!(config.max_rate_limit_retries, None);
    }

    #[test]
    fn test_validate() {
        assert!(SchedulerConfig::default().validate().is_ok());

        let zero_budget = SchedulerConfig {
            requests_per_window: 0,
            ..Default::default()
        };
        assert!(zero_budget.validate().is_err());

        let zero_window = SchedulerConfig {
            window_secs: 0,
            ..Default::default()
        };
        assert!(zero_window.validate().is_err());
    }
}
