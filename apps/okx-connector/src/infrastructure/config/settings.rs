//! Connector Configuration Settings
//!
//! Configuration types for the connector, loaded from environment variables.
//!
//! | Variable                               | Default                |
//! |----------------------------------------|------------------------|
//! | `OKX_API_KEY`                          | required               |
//! | `OKX_SECRET_KEY`                       | required               |
//! | `OKX_PASSPHRASE`                       | required               |
//! | `OKX_SIMULATED`                        | `false`                |
//! | `OKX_REST_HOST`                        | `https://www.okx.com`  |
//! | `OKX_REST_TIMEOUT_SECS`                | `10`                   |
//! | `OKX_SUBSCRIPTIONS`                    | empty                  |
//! | `CONNECTOR_HEARTBEAT_INTERVAL_SECS`    | `20`                   |
//! | `CONNECTOR_PONG_TIMEOUT_SECS`          | `20`                   |
//! | `CONNECTOR_READ_TIMEOUT_SECS`          | `60`                   |
//! | `CONNECTOR_LOGIN_TIMEOUT_SECS`         | `10`                   |
//! | `CONNECTOR_CONNECT_TIMEOUT_SECS`       | `10`                   |
//! | `CONNECTOR_RECONNECT_DELAY_MS`         | `2000`                 |
//! | `CONNECTOR_MAX_RECONNECT_ATTEMPTS`     | `5`                    |
//! | `CONNECTOR_METRICS_PORT`               | `9090` (0 = disabled)  |

use std::time::Duration;

use crate::domain::topic::Topic;
use crate::infrastructure::okx::auth::Credentials;
use crate::infrastructure::okx::connection::ConnectionSettings;
use crate::infrastructure::okx::dialer::DEFAULT_CONNECT_TIMEOUT;
use crate::infrastructure::okx::heartbeat::HeartbeatConfig;
use crate::infrastructure::okx::reconnect::ReconnectConfig;
use crate::infrastructure::rest::RestSettings;

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { metrics_port: 9090 }
    }
}

/// Complete connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// API credentials (carries the simulated-trading flag).
    pub credentials: Credentials,
    /// REST client settings.
    pub rest: RestSettings,
    /// Streaming connection settings.
    pub connection: ConnectionSettings,
    /// WebSocket handshake timeout.
    pub connect_timeout: Duration,
    /// Server port settings.
    pub server: ServerSettings,
    /// Topics to subscribe at startup.
    pub subscriptions: Vec<Topic>,
}

impl ConnectorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// a value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let api_key = env.required("OKX_API_KEY")?;
        let secret_key = env.required("OKX_SECRET_KEY")?;
        let passphrase = env.required("OKX_PASSPHRASE")?;
        let simulated = env.bool("OKX_SIMULATED", false)?;

        let credentials = Credentials::new(api_key, secret_key, passphrase)
            .map_err(|e| ConfigError::InvalidValue {
                key: "OKX_API_KEY".to_string(),
                reason: e.to_string(),
            })?
            .simulated(simulated);

        let rest_defaults = RestSettings::default();
        let rest = RestSettings {
            base_url: env.get("OKX_REST_HOST").unwrap_or(rest_defaults.base_url),
            timeout: env.secs("OKX_REST_TIMEOUT_SECS", rest_defaults.timeout)?,
        };

        let defaults = ConnectionSettings::default();
        let reconnect_delay = env.millis(
            "CONNECTOR_RECONNECT_DELAY_MS",
            defaults.reconnect.initial_delay,
        )?;
        let max_attempts = env.parse(
            "CONNECTOR_MAX_RECONNECT_ATTEMPTS",
            defaults.reconnect.max_attempts,
        )?;
        let connection = ConnectionSettings {
            heartbeat: HeartbeatConfig::new(
                env.secs(
                    "CONNECTOR_HEARTBEAT_INTERVAL_SECS",
                    defaults.heartbeat.ping_interval,
                )?,
                env.secs(
                    "CONNECTOR_PONG_TIMEOUT_SECS",
                    defaults.heartbeat.pong_timeout,
                )?,
            ),
            reconnect: ReconnectConfig::fixed(reconnect_delay, max_attempts),
            read_timeout: env.secs("CONNECTOR_READ_TIMEOUT_SECS", defaults.read_timeout)?,
            login_timeout: env.secs("CONNECTOR_LOGIN_TIMEOUT_SECS", defaults.login_timeout)?,
        };

        let server = ServerSettings {
            metrics_port: env.parse(
                "CONNECTOR_METRICS_PORT",
                ServerSettings::default().metrics_port,
            )?,
        };

        let subscriptions = env
            .get("OKX_SUBSCRIPTIONS")
            .map(|list| list.split(',').filter_map(Topic::parse).collect())
            .unwrap_or_default();

        Ok(Self {
            credentials,
            rest,
            connection,
            connect_timeout: env.secs("CONNECTOR_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT)?,
            server,
            subscriptions,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse failure.
        reason: String,
    },
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = (self.0)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value.trim().to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key).map_or(Ok(default), |v| {
            v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes") => Ok(true),
            Some("0" | "false" | "no") => Ok(false),
            Some(other) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a boolean, got {other:?}"),
            }),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ConnectorConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ConnectorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const CREDS: [(&str, &str); 3] = [
        ("OKX_API_KEY", "key"),
        ("OKX_SECRET_KEY", "secret"),
        ("OKX_PASSPHRASE", "pass"),
    ];

    #[test]
    fn defaults_match_exchange_guidance() {
        let config = config(&CREDS).unwrap();
        assert!(!config.credentials.is_simulated());
        assert_eq!(config.rest.base_url, "https://www.okx.com");
        assert_eq!(config.connection.heartbeat.ping_interval, Duration::from_secs(20));
        assert_eq!(config.connection.read_timeout, Duration::from_secs(60));
        assert_eq!(config.connection.reconnect.max_attempts, 5);
        assert_eq!(
            config.connection.reconnect.initial_delay,
            Duration::from_secs(2)
        );
        assert_eq!(config.server.metrics_port, 9090);
        assert!(config.subscriptions.is_empty());
    }

    #[test]
    fn missing_and_empty_credentials() {
        let err = config(&CREDS[..2]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OKX_PASSPHRASE"));

        let err = config(&[CREDS[0], CREDS[1], ("OKX_PASSPHRASE", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(ref k) if k == "OKX_PASSPHRASE"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = CREDS.to_vec();
        vars.extend([
            ("OKX_SIMULATED", "true"),
            ("CONNECTOR_RECONNECT_DELAY_MS", "250"),
            ("CONNECTOR_MAX_RECONNECT_ATTEMPTS", "3"),
            ("CONNECTOR_METRICS_PORT", "0"),
            ("OKX_SUBSCRIPTIONS", "books5:BTC-USDT, candle1m:ETH-USDT,,account"),
        ]);
        let config = config(&vars).unwrap();
        assert!(config.credentials.is_simulated());
        assert_eq!(
            config.connection.reconnect,
            ReconnectConfig::fixed(Duration::from_millis(250), 3)
        );
        assert_eq!(config.server.metrics_port, 0);
        let topics: Vec<String> = config.subscriptions.iter().map(ToString::to_string).collect();
        assert_eq!(topics, ["books5:BTC-USDT", "candle1m:ETH-USDT", "account"]);
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let mut vars = CREDS.to_vec();
        vars.push(("CONNECTOR_READ_TIMEOUT_SECS", "soon"));
        let err = config(&vars).unwrap_err();
        assert!(err.to_string().contains("CONNECTOR_READ_TIMEOUT_SECS"));

        let mut vars = CREDS.to_vec();
        vars.push(("OKX_SIMULATED", "maybe"));
        assert!(config(&vars).is_err());
    }
}
