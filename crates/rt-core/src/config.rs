//! Engine configuration

use std::path::Path;
use std::time::Duration;

use cccp_infra_common::config::{load_config, DEFAULT_ENV_PREFIX};
use cccp_infra_common::errors::ResultExt;
use cccp_infra_common::logging::LoggingConfig;
use serde::Deserialize;

use crate::error::{Result, RtError};

/// Top level configuration of the real-time engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RtConfig {
    /// Local time of the daily reset ("HH:MM" or "HH:MM:SS"); no reset when unset
    pub reset_time: Option<String>,
    /// Reduced views for call-flow deployments
    pub callflow: bool,
    /// Period of the reset loop once started
    pub reset_interval_secs: u64,
    /// Debounce and cleanup delays
    pub timings: Timings,
    /// Logging setup used by binaries
    pub logging: LoggingConfig,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            reset_time: None,
            callflow: false,
            reset_interval_secs: 86_400,
            timings: Timings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RtConfig {
    /// Load from an optional TOML file, then `CCCP__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(load_config(path, DEFAULT_ENV_PREFIX).in_context("rt-core", "load_config")?)
    }

    /// Parse an inline TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| RtError::config(e.to_string()))
    }

    pub fn reset_interval(&self) -> Duration {
        Duration::from_secs(self.reset_interval_secs)
    }
}

/// Delays of every deferred callback, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub session_flush_ms: u64,
    pub profile_flush_ms: u64,
    pub subscription_flush_ms: u64,
    pub communication_subscription_flush_ms: u64,
    pub listener_flush_ms: u64,
    pub communication_flush_ms: u64,
    pub task_flush_ms: u64,
    pub scope_cleanup_ms: u64,
    pub terminated_cleanup_ms: u64,
    pub view_query_delay_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            session_flush_ms: 100,
            profile_flush_ms: 100,
            subscription_flush_ms: 100,
            communication_subscription_flush_ms: 200,
            listener_flush_ms: 200,
            communication_flush_ms: 300,
            task_flush_ms: 500,
            scope_cleanup_ms: 5_000,
            terminated_cleanup_ms: 10_000,
            view_query_delay_ms: 200,
        }
    }
}

impl Timings {
    pub fn session_flush(&self) -> Duration {
        Duration::from_millis(self.session_flush_ms)
    }

    pub fn profile_flush(&self) -> Duration {
        Duration::from_millis(self.profile_flush_ms)
    }

    pub fn subscription_flush(&self) -> Duration {
        Duration::from_millis(self.subscription_flush_ms)
    }

    pub fn communication_subscription_flush(&self) -> Duration {
        Duration::from_millis(self.communication_subscription_flush_ms)
    }

    pub fn listener_flush(&self) -> Duration {
        Duration::from_millis(self.listener_flush_ms)
    }

    pub fn communication_flush(&self) -> Duration {
        Duration::from_millis(self.communication_flush_ms)
    }

    pub fn task_flush(&self) -> Duration {
        Duration::from_millis(self.task_flush_ms)
    }

    pub fn scope_cleanup(&self) -> Duration {
        Duration::from_millis(self.scope_cleanup_ms)
    }

    pub fn terminated_cleanup(&self) -> Duration {
        Duration::from_millis(self.terminated_cleanup_ms)
    }

    pub fn view_query_delay(&self) -> Duration {
        Duration::from_millis(self.view_query_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = RtConfig::default();
        assert_eq!(config.reset_time, None);
        assert!(!config.callflow);
        assert_eq!(config.reset_interval(), Duration::from_secs(86_400));
        assert_eq!(config.timings.task_flush(), Duration::from_millis(500));
        assert_eq!(config.timings.scope_cleanup(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml() {
        let config = RtConfig::from_toml_str(
            r#"
            reset_time = "03:30"
            callflow = true

            [timings]
            session_flush_ms = 20

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.reset_time.as_deref(), Some("03:30"));
        assert!(config.callflow);
        assert_eq!(config.timings.session_flush_ms, 20);
        assert_eq!(config.timings.profile_flush_ms, 100);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = RtConfig::from_toml_str("callflow = \"maybe\"").unwrap_err();
        assert!(matches!(err, RtError::Config { .. }));
    }
}
