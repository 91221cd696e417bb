// crates/core/src/config.rs
//! Client configuration.
//!
//! Precedence, lowest first: built-in defaults, optional TOML file,
//! `NETOPS_*` environment variables, then the backend's `GET /api/config`
//! (see [`AppConfig::apply_remote`]). Durations are written in milliseconds.

use std::path::Path;
use std::time::Duration;

use netops_types::RemoteConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default backend address when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub poller: PollerConfig,
    pub retry: RetryPolicy,
    pub progress: ProgressConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    #[serde(rename = "max_poll_interval_ms", with = "millis")]
    pub max_poll_interval: Duration,
    pub backoff_factor: f64,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            max_poll_interval: Duration::from_millis(10_000),
            backoff_factor: 1.2,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Retry policy for idempotent requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total calls, first one included.
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub ai_mode_max_progress: f64,
    pub command_mode_max_progress: f64,
    #[serde(rename = "ai_mode_interval_ms", with = "millis")]
    pub ai_mode_interval: Duration,
    #[serde(rename = "command_mode_interval_ms", with = "millis")]
    pub command_mode_interval: Duration,
    #[serde(rename = "throttle_ms", with = "millis")]
    pub throttle: Duration,
    #[serde(rename = "connecting_delay_ms", with = "millis")]
    pub connecting_delay: Duration,
    #[serde(rename = "executing_base_delay_ms", with = "millis")]
    pub executing_base_delay: Duration,
    #[serde(rename = "executing_per_device_ms", with = "millis")]
    pub executing_per_device: Duration,
    #[serde(rename = "executing_max_extra_ms", with = "millis")]
    pub executing_max_extra: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            ai_mode_max_progress: 0.75,
            command_mode_max_progress: 0.85,
            ai_mode_interval: Duration::from_millis(400),
            command_mode_interval: Duration::from_millis(300),
            throttle: Duration::from_millis(200),
            connecting_delay: Duration::from_millis(300),
            executing_base_delay: Duration::from_millis(500),
            executing_per_device: Duration::from_millis(100),
            executing_max_extra: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    #[serde(rename = "debounce_delay_ms", with = "millis")]
    pub debounce_delay: Duration,
    #[serde(rename = "success_clear_delay_ms", with = "millis")]
    pub success_clear_delay: Duration,
    #[serde(rename = "error_clear_delay_ms", with = "millis")]
    pub error_clear_delay: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_millis(1000),
            success_clear_delay: Duration::from_secs(8),
            error_clear_delay: Duration::from_secs(12),
        }
    }
}

impl AppConfig {
    /// Defaults, then `path` (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `NETOPS_*` overrides from `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("NETOPS_API_URL") {
            self.client.base_url = url;
        }
        if let Some(ms) = env_millis(&lookup, "NETOPS_REQUEST_TIMEOUT_MS")? {
            self.client.request_timeout = ms;
        }
        if let Some(ms) = env_millis(&lookup, "NETOPS_POLL_INTERVAL_MS")? {
            self.poller.poll_interval = ms;
        }
        if let Some(ms) = env_millis(&lookup, "NETOPS_POLL_TIMEOUT_MS")? {
            self.poller.timeout = ms;
        }
        Ok(())
    }

    /// Merge the knobs the backend publishes. Unset fields keep local values.
    pub fn apply_remote(&mut self, remote: &RemoteConfig) {
        if let Some(polling) = &remote.polling {
            if let Some(ms) = polling.interval_ms {
                self.poller.poll_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = polling.max_interval_ms {
                self.poller.max_poll_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = polling.timeout_ms {
                self.poller.timeout = Duration::from_millis(ms);
            }
        }
        if let Some(execution) = &remote.execution {
            if let Some(ms) = execution.debounce_ms {
                self.execution.debounce_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = execution.success_clear_ms {
                self.execution.success_clear_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = execution.error_clear_ms {
                self.execution.error_clear_delay = Duration::from_millis(ms);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.poll_interval.is_zero() {
            return Err(invalid("poller.poll_interval_ms", "must be greater than zero"));
        }
        if self.poller.max_poll_interval < self.poller.poll_interval {
            return Err(invalid(
                "poller.max_poll_interval_ms",
                "must not be below poll_interval_ms",
            ));
        }
        if !(self.poller.backoff_factor >= 1.0) {
            return Err(invalid("poller.backoff_factor", "must be at least 1.0"));
        }
        for (field, ratio) in [
            ("progress.ai_mode_max_progress", self.progress.ai_mode_max_progress),
            ("progress.command_mode_max_progress", self.progress.command_mode_max_progress),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(invalid(field, "must be in (0, 1]"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        message: message.to_string(),
    }
}

fn env_millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ConfigError::InvalidValue {
                field: key,
                message: e.to_string(),
            }),
    }
}

/// `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netops_types::{RemoteExecution, RemotePolling};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.poller.poll_interval, Duration::from_millis(2000));
        assert_eq!(config.poller.max_poll_interval, Duration::from_millis(10_000));
        assert_eq!(config.poller.timeout, Duration::from_secs(1800));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.execution.debounce_delay, Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[client]\nbase_url = \"http://netops.lan:8080\"\n\n[poller]\npoll_interval_ms = 500\n"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.client.base_url, "http://netops.lan:8080");
        assert_eq!(config.poller.poll_interval, Duration::from_millis(500));
        assert_eq!(config.poller.backoff_factor, 1.2);
        assert_eq!(config.progress, ProgressConfig::default());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[poller\npoll_interval_ms = ").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("NETOPS_API_URL", "http://10.1.1.1:5000"),
            ("NETOPS_POLL_INTERVAL_MS", "750"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.client.base_url, "http://10.1.1.1:5000");
        assert_eq!(config.poller.poll_interval, Duration::from_millis(750));
    }

    #[test]
    fn test_env_rejects_non_numeric() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_with(|k| (k == "NETOPS_POLL_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "NETOPS_POLL_TIMEOUT_MS", .. }));
    }

    #[test]
    fn test_apply_remote_only_touches_published_fields() {
        let mut config = AppConfig::default();
        config.apply_remote(&RemoteConfig {
            polling: Some(RemotePolling {
                interval_ms: Some(1000),
                max_interval_ms: None,
                timeout_ms: Some(60_000),
            }),
            execution: Some(RemoteExecution {
                debounce_ms: Some(250),
                ..Default::default()
            }),
            extra: Default::default(),
        });
        assert_eq!(config.poller.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.poller.max_poll_interval, Duration::from_millis(10_000));
        assert_eq!(config.poller.timeout, Duration::from_secs(60));
        assert_eq!(config.execution.debounce_delay, Duration::from_millis(250));
        assert_eq!(config.execution.success_clear_delay, Duration::from_secs(8));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.poller.max_poll_interval = Duration::from_millis(100);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.poller.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.progress.ai_mode_max_progress = 1.5;
        assert!(config.validate().is_err());
    }
}
