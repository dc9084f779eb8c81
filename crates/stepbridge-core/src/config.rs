use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".into()
}
const fn default_port() -> u16 {
    9998
}
const fn default_timeout_secs() -> f64 {
    10.0
}
const fn default_poll_interval_secs() -> f64 {
    0.2
}
const fn default_max_polls() -> u32 {
    100
}
fn default_learner_thread_name() -> String {
    "learner".into()
}

// ---------------------------------------------------------------------------
// ProxyConfig
// ---------------------------------------------------------------------------

/// Transport settings shared by the remote server and client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Host the client connects to / the server binds on.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port (default: 9998).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Total readiness budget for a single send or receive, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Granularity of the shrinking poll sub-timeouts, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,

    /// Upper bound on the number of sub-timeouts per budget.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_max_polls(),
        }
    }
}

impl ProxyConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        seconds("timeout_secs", self.timeout_secs)?;
        seconds("poll_interval_secs", self.poll_interval_secs)?;
        if self.max_polls == 0 {
            return Err(invalid("max_polls", "must be at least 1"));
        }
        if self.poll_interval_secs * f64::from(self.max_polls) < self.timeout_secs {
            return Err(invalid(
                "max_polls",
                "poll_interval_secs * max_polls must cover timeout_secs",
            ));
        }
        Ok(())
    }

    /// `host:port` string for binding or connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Total budget per socket operation; zero if `timeout_secs` is invalid.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or_default()
    }

    /// Zero if `poll_interval_secs` is invalid.
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_secs).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// RunnerConfig
// ---------------------------------------------------------------------------

/// Settings for the threaded runner that owns the plan scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Stop after this many units of work. `None` runs until the learner
    /// lets go of the bridge.
    #[serde(default)]
    pub max_units: Option<u64>,

    /// Name given to the spawned learning-loop thread.
    #[serde(default = "default_learner_thread_name")]
    pub learner_thread_name: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_units: None,
            learner_thread_name: default_learner_thread_name(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_units == Some(0) {
            return Err(invalid("max_units", "a run of zero units makes no sense"));
        }
        if self.learner_thread_name.is_empty() {
            return Err(invalid("learner_thread_name", "must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StepBridgeConfig
// ---------------------------------------------------------------------------

/// Top-level configuration file.
///
/// ```toml
/// [proxy]
/// port = 9998
/// timeout_secs = 10.0
///
/// [runner]
/// max_units = 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepBridgeConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl StepBridgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.proxy.validate()?;
        self.runner.validate()
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Non-zero duration of `secs` seconds, rejecting negative, NaN and
/// unrepresentable values.
fn seconds(field: &str, secs: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(invalid(field, "must be a positive number of seconds")),
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StepBridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.proxy.port, 9998);
        assert_eq!(config.proxy.address(), "127.0.0.1:9998");
        assert_eq!(config.proxy.timeout(), Duration::from_secs(10));
        assert_eq!(config.proxy.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.runner.max_units, None);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = StepBridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, StepBridgeConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let config = StepBridgeConfig::from_toml_str(
            r#"
            [proxy]
            host = "0.0.0.0"
            port = 12000

            [runner]
            max_units = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.proxy.address(), "0.0.0.0:12000");
        assert!((config.proxy.timeout_secs - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.runner.max_units, Some(42));
        assert_eq!(config.runner.learner_thread_name, "learner");
    }

    #[test]
    fn zero_units_rejected() {
        let err = StepBridgeConfig::from_toml_str("[runner]\nmax_units = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "max_units"));
    }

    #[test]
    fn poll_budget_must_cover_timeout() {
        let config = ProxyConfig {
            timeout_secs: 30.0,
            poll_interval_secs: 0.1,
            max_polls: 100,
            ..ProxyConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_timeout_rejected() {
        let config = ProxyConfig {
            timeout_secs: 0.0,
            ..ProxyConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unrepresentable_durations_rejected() {
        for (timeout_secs, poll_interval_secs) in [
            (-1.0, 0.2),
            (f64::NAN, 0.2),
            (f64::INFINITY, 0.2),
            (1e300, 1e300),
            (10.0, -0.5),
            (10.0, 1e-12),
        ] {
            let config = ProxyConfig {
                timeout_secs,
                poll_interval_secs,
                ..ProxyConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidValue { .. })),
                "{timeout_secs} / {poll_interval_secs}"
            );
            // Accessors never panic, even on a config that failed validation.
            let _ = (config.timeout(), config.poll_interval());
        }
    }

    #[test]
    fn from_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[proxy]\nport = 9000\ntimeout_secs = 2.5").unwrap();
        let config = StepBridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.proxy.port, 9000);
        assert!((config.proxy.timeout_secs - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = StepBridgeConfig::from_file("/nonexistent/stepbridge.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let err = StepBridgeConfig::from_toml_str("[proxy\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
