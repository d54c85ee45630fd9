//! Library configuration
//!
//! Values are layered with figment: built-in defaults, then an optional file
//! (YAML, TOML or JSON by extension), then `AIRLINK_` environment variables.
//! Nested keys use a double underscore, e.g. `AIRLINK_SESSION__MAX_RETRIES=5`.

use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{AirlinkError, Result};
use crate::protocol::constants::{MAX_SLAVE_ADDRESS, MIN_SLAVE_ADDRESS};
use crate::transport::SerialConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "AIRLINK_";

/// Durations are written as integer milliseconds in config files
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Top level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirlinkConfig {
    pub serial: SerialConfig,
    pub session: SessionConfig,
    pub node: NodeConfig,
    pub bridge: BridgeConfig,
    pub binding: BindingConfig,
    pub logging: LoggingConfig,
}

/// Request sequencing and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for one request/response exchange
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Retries after the first attempt for transient faults
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    /// Randomize backoff delays by up to 25%
    pub jitter: bool,
    /// Quiet time the bridge needs between two commands
    #[serde(with = "duration_ms")]
    pub min_command_gap: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(1),
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(1),
            jitter: false,
            min_command_gap: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// How long a cached value counts as fresh
    #[serde(with = "duration_ms")]
    pub staleness: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Modbus slave address of the bridge itself
    pub address: u8,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { address: 207 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Interval between two reads of the binding status register
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Deadline used when the caller does not pass one
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            default_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Write a daily rolling log file here as well as to the console
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl AirlinkConfig {
    /// Load defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = path {
            if !path.exists() {
                return Err(AirlinkError::config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .ok_or_else(|| AirlinkError::config("config file must have an extension"))?;

            figment = match extension {
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                "toml" => figment.merge(Toml::file(path)),
                "json" => figment.merge(Json::file(path)),
                other => {
                    return Err(AirlinkError::config(format!(
                        "unsupported config file format: {other}"
                    )))
                },
            };
            debug!("Loading configuration from {}", path.display());
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.serial
            .validate()
            .map_err(|e| AirlinkError::config(e.to_string()))?;

        let session = &self.session;
        if session.request_timeout.is_zero() {
            return Err(AirlinkError::config("session.request_timeout must be positive"));
        }
        if !session.backoff_multiplier.is_finite() || session.backoff_multiplier < 1.0 {
            return Err(AirlinkError::config(format!(
                "session.backoff_multiplier must be at least 1, got {}",
                session.backoff_multiplier
            )));
        }
        if session.max_backoff < session.initial_backoff {
            return Err(AirlinkError::config(
                "session.max_backoff is shorter than session.initial_backoff",
            ));
        }

        if !(MIN_SLAVE_ADDRESS..=MAX_SLAVE_ADDRESS).contains(&self.bridge.address) {
            return Err(AirlinkError::config(format!(
                "bridge.address {} outside {}..={}",
                self.bridge.address, MIN_SLAVE_ADDRESS, MAX_SLAVE_ADDRESS
            )));
        }

        if self.binding.poll_interval.is_zero() {
            return Err(AirlinkError::config("binding.poll_interval must be positive"));
        }
        if self.binding.default_timeout.is_zero() {
            return Err(AirlinkError::config("binding.default_timeout must be positive"));
        }
        Ok(())
    }
}
