//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default debug port host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default debug port.
pub const DEFAULT_PORT: u16 = 4318;

/// Configuration error.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Host must not be empty")]
    EmptyHost,
    #[error("Port must be non-zero")]
    ZeroPort,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("Backoff multiplier must be a finite number of at least 1.0, got {0}")]
    Multiplier(f64),
    #[error("Max retry delay {max:?} is below initial retry delay {initial:?}")]
    RetryRange { initial: Duration, max: Duration },
}

/// Connection settings for a [`ConnectionManager`](crate::ConnectionManager).
///
/// Durations serialize as floating-point seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Wait before the first reconnect attempt.
    #[serde(with = "secs")]
    pub initial_retry_delay: Duration,
    /// Upper bound for the reconnect wait.
    #[serde(with = "secs")]
    pub max_retry_delay: Duration,
    /// Growth factor applied after each failed wait.
    pub backoff_multiplier: f64,
    /// Bound on a single connect attempt.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// How long `send_command` waits for a response.
    #[serde(with = "secs")]
    pub command_timeout: Duration,
    /// Largest inbound payload accepted.
    pub max_payload_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            initial_retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            max_payload_len: 16 * 1024 * 1024,
        }
    }
}

impl ConnectionConfig {
    /// Create a config for `host:port` with default timings.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the retry schedule.
    #[must_use]
    pub fn with_retry(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_retry_delay = initial;
        self.max_retry_delay = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-command response timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the inbound payload limit.
    #[must_use]
    pub fn with_max_payload_len(mut self, limit: usize) -> Self {
        self.max_payload_len = limit;
        self
    }

    /// `host:port` string used for connecting.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the settings are usable.
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        for (name, value) in [
            ("initial_retry_delay", self.initial_retry_delay),
            ("connect_timeout", self.connect_timeout),
            ("command_timeout", self.command_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Multiplier(self.backoff_multiplier));
        }
        if self.max_retry_delay < self.initial_retry_delay {
            return Err(ConfigError::RetryRange {
                initial: self.initial_retry_delay,
                max: self.max_retry_delay,
            });
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.address(), "127.0.0.1:4318");
        assert_eq!(config.initial_retry_delay, Duration::from_secs(2));
        assert_eq!(config.max_retry_delay, Duration::from_secs(30));
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_json_uses_seconds() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"host": "10.0.0.5", "port": 5000, "initial_retry_delay": 0.5}"#,
        )
        .unwrap();

        assert_eq!(config.address(), "10.0.0.5:5000");
        assert_eq!(config.initial_retry_delay, Duration::from_millis(500));
        assert_eq!(config.max_retry_delay, Duration::from_secs(30));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["command_timeout"], 30.0);
    }

    #[test]
    fn test_negative_seconds_rejected() {
        let result = serde_json::from_str::<ConnectionConfig>(r#"{"command_timeout": -1.0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            ConnectionConfig::new("", 1).validate(),
            Err(ConfigError::EmptyHost)
        );
        assert_eq!(
            ConnectionConfig::new("localhost", 0).validate(),
            Err(ConfigError::ZeroPort)
        );
        assert_eq!(
            ConnectionConfig::default()
                .with_command_timeout(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroDuration("command_timeout"))
        );
        assert_eq!(
            ConnectionConfig::default()
                .with_retry(Duration::from_secs(1), Duration::from_secs(5), 0.5)
                .validate(),
            Err(ConfigError::Multiplier(0.5))
        );
        assert!(matches!(
            ConnectionConfig::default()
                .with_retry(Duration::from_secs(1), Duration::from_secs(5), f64::INFINITY)
                .validate(),
            Err(ConfigError::Multiplier(m)) if m.is_infinite()
        ));
        assert!(matches!(
            ConnectionConfig::default()
                .with_retry(Duration::from_secs(1), Duration::from_secs(5), f64::NAN)
                .validate(),
            Err(ConfigError::Multiplier(m)) if m.is_nan()
        ));
        // Large but finite multipliers are usable; the delay saturates at the max.
        assert_eq!(
            ConnectionConfig::default()
                .with_retry(Duration::from_secs(2), Duration::from_secs(30), 1e20)
                .validate(),
            Ok(())
        );
        assert!(matches!(
            ConnectionConfig::default()
                .with_retry(Duration::from_secs(10), Duration::from_secs(5), 2.0)
                .validate(),
            Err(ConfigError::RetryRange { .. })
        ));
    }
}
