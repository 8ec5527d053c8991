//! Agent configuration
//!
//! Configuration is a TOML document with `[main]`, `[mqtt]` and an optional
//! `[sensor]` section. Integer options accept both TOML integers and numeric
//! strings, so configs carried over from INI files keep working.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default MQTT-over-TLS port
pub const DEFAULT_MQTT_PORT: u16 = 8883;

/// Root CA bundle shipped next to the agent
pub const DEFAULT_CA_FILE: &str = "AmazonRootCA1.pem";

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub main: MainSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub sensor: SensorSection,
}

/// Polling loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MainSection {
    /// GPIO line the DHT22 data pin is wired to
    #[serde(deserialize_with = "int_or_string")]
    pub dht22_pin: u32,
    /// Location tag embedded in every record
    pub location: String,
    /// Seconds between poll cycles
    #[serde(deserialize_with = "int_or_string")]
    pub sleep_interval: u64,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker hostname
    pub endpoint: String,
    #[serde(default = "default_port", deserialize_with = "int_or_string")]
    pub port: u16,
    /// Pinned root CA used to verify the broker
    #[serde(default = "default_ca_path")]
    pub ca_path: PathBuf,
    /// Client certificate (PEM)
    pub cert_path: PathBuf,
    /// Client private key (PEM)
    pub key_path: PathBuf,
    pub client_id: String,
    pub topic: String,
    #[serde(default = "default_keep_alive", deserialize_with = "int_or_string")]
    pub keep_alive_secs: u64,
    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "int_or_string"
    )]
    pub connect_timeout_secs: u64,
    /// Upper bound on waiting for PUBACK. Unset means wait until the broker
    /// acknowledges or the connection drops.
    #[serde(
        default,
        deserialize_with = "opt_int_or_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub publish_timeout_secs: Option<u64>,
}

/// Sensor acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSection {
    /// Low-level read attempts per poll cycle
    #[serde(default = "default_read_retries", deserialize_with = "int_or_string")]
    pub read_retries: u32,
    /// Seconds between failed read attempts
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "int_or_string"
    )]
    pub retry_delay_secs: u64,
    /// Explicit IIO device directory, bypasses discovery by pin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iio_device: Option<PathBuf>,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            read_retries: default_read_retries(),
            retry_delay_secs: default_retry_delay(),
            iio_device: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_ca_path() -> PathBuf {
    PathBuf::from(DEFAULT_CA_FILE)
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_read_retries() -> u32 {
    15
}

fn default_retry_delay() -> u64 {
    2
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrString {
    Int(i64),
    Str(String),
}

impl IntOrString {
    fn parse<T, E>(self) -> Result<T, E>
    where
        T: TryFrom<i64> + FromStr,
        <T as TryFrom<i64>>::Error: Display,
        <T as FromStr>::Err: Display,
        E: de::Error,
    {
        match self {
            IntOrString::Int(value) => T::try_from(value).map_err(E::custom),
            IntOrString::Str(text) => text
                .trim()
                .parse::<T>()
                .map_err(|e| E::custom(format!("invalid integer '{text}': {e}"))),
        }
    }
}

fn int_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64> + FromStr,
    <T as TryFrom<i64>>::Error: Display,
    <T as FromStr>::Err: Display,
{
    IntOrString::deserialize(deserializer)?.parse()
}

fn opt_int_or_string<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64> + FromStr,
    <T as TryFrom<i64>>::Error: Display,
    <T as FromStr>::Err: Display,
{
    Option::<IntOrString>::deserialize(deserializer)?
        .map(IntOrString::parse)
        .transpose()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentConfig {
    /// Load configuration from a TOML file
    ///
    /// Relative TLS paths are resolved against the directory holding the
    /// config file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("main.location", &self.main.location)?;
        require_non_empty("mqtt.endpoint", &self.mqtt.endpoint)?;
        require_non_empty("mqtt.client_id", &self.mqtt.client_id)?;
        require_non_empty("mqtt.topic", &self.mqtt.topic)?;

        if self.mqtt.client_id != self.mqtt.client_id.trim() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id must not have surrounding whitespace".to_string(),
            ));
        }
        if self.mqtt.topic.contains(['+', '#']) {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.topic '{}' must not contain wildcards",
                self.mqtt.topic
            )));
        }
        if self.main.sleep_interval == 0 {
            return Err(ConfigError::InvalidConfig(
                "main.sleep_interval must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.port must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.keep_alive_secs == 0 || self.mqtt.keep_alive_secs > u64::from(u16::MAX) {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.keep_alive_secs must be between 1 and {}",
                u16::MAX
            )));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.sensor.read_retries == 0 {
            return Err(ConfigError::InvalidConfig(
                "sensor.read_retries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.mqtt.ca_path,
            &mut self.mqtt.cert_path,
            &mut self.mqtt.key_path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.main.sleep_interval)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[main]
dht22_pin = 4
location = "kitchen"
sleep_interval = 60

[mqtt]
endpoint = "broker.example.com"
cert_path = "device.pem.crt"
key_path = "private.pem.key"
client_id = "dht22-kitchen"
topic = "sensors/kitchen"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

fn require_non_empty(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidConfig(format!("{name} must not be empty")));
    }
    Ok(())
}
