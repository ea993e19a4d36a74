//! Configuration for the telemetry backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the key-path store inside `data_path`.
pub const STORE_FILE: &str = "store.json";

/// Main configuration for the telemetry backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the telemetry store
    pub data_path: PathBuf,

    /// IANA zone used for recency windows and displayed dates
    pub timezone: String,

    /// Address the API server binds to
    pub host: IpAddr,

    /// HTTP port of the API server
    pub port: u16,

    /// Relay logs to the IoT hub before storing them
    pub relay_to_hub: bool,

    /// Interval between simulated transmissions while serving, zero disables them
    #[serde(with = "duration_serde")]
    pub simulation_interval: Duration,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("acme-telemetry");

        Self {
            data_path: data_dir,
            timezone: "UTC".to_string(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            relay_to_hub: false,
            simulation_interval: Duration::from_secs(600), // 10 minutes
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            Self::from_json(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration JSON. Missing fields take defaults.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.tz()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `config_path`.
    pub fn save_to(&self, config_path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Set one field from its textual value, e.g. `port` to `9000`.
    ///
    /// The value is read as JSON when it parses, otherwise as a string. The
    /// result is validated like a loaded file.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut fields =
            serde_json::to_value(&*self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        let slot = fields
            .get_mut(key)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        *slot = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));

        *self = Self::from_json(&fields.to_string())?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("acme-telemetry")
            .join("config.json")
    }

    /// Path of the JSON store file.
    pub fn store_path(&self) -> PathBuf {
        self.data_path.join(STORE_FILE)
    }

    /// The configured time zone.
    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    /// Simulation interval, or `None` when disabled.
    pub fn simulation_period(&self) -> Option<Duration> {
        (!self.simulation_interval.is_zero()).then_some(self.simulation_interval)
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::IoError(e.to_string()))
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidTimezone(String),
    UnknownKey(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidTimezone(tz) => write!(f, "Unknown time zone: {tz}"),
            ConfigError::UnknownKey(key) => write!(f, "Unknown config key: {key}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
