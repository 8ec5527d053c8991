//! Pure connection state management for the MQTT session
//!
//! This module contains the connection state model, reconnection backoff,
//! transport errors and the construction of `MqttOptions` from config and
//! TLS material.

use crate::config::MqttSection;
use crate::error::ErrorKind;
use rumqttc::{MqttOptions, TlsConfiguration, Transport as RumqttcTransport};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// ALPN protocol AWS IoT requires for MQTT over port 443
const AWS_IOT_ALPN: &[u8] = b"x-amzn-mqtt-ca";

/// Connection state for the MQTT session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial handshake in progress
    Connecting,
    /// CONNACK received, publishing allowed
    Connected,
    /// Connection lost with reason
    Disconnected(String),
    /// Re-establishing the connection (attempt count)
    Reconnecting(u32),
}

/// Reconnection backoff configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![1_000, 2_000, 5_000, 10_000],
            sustained_delay: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Calculate backoff delay for given attempt using the pattern
    /// Pattern: 1s, 2s, 5s, 10s, then sustain at 30s forever
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to load TLS material from {}", path.display())]
    TlsMaterial {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Connection failed")]
    ConnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("No CONNACK within {secs}s")]
    ConnectTimeout { secs: u64 },
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::TlsMaterial { .. }
            | TransportError::InvalidEndpoint(_)
            | TransportError::ConnectFailed(_)
            | TransportError::ConnectTimeout { .. } => ErrorKind::TransportConnectFailure,
            TransportError::NotConnected { .. } | TransportError::DisconnectFailed(_) => {
                ErrorKind::TransportDisconnected
            }
            TransportError::PublishFailed(_) => ErrorKind::PublishFailure,
        }
    }
}

/// PEM-encoded CA bundle and client identity
#[derive(Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca", &format_args!("{} bytes", self.ca.len()))
            .field("client_cert", &format_args!("{} bytes", self.client_cert.len()))
            .field("client_key", &"<redacted>")
            .finish()
    }
}

impl TlsMaterial {
    /// Read CA, certificate and key files named in the config
    pub async fn load(config: &MqttSection) -> Result<Self, TransportError> {
        Ok(Self {
            ca: read_pem(&config.ca_path).await?,
            client_cert: read_pem(&config.cert_path).await?,
            client_key: read_pem(&config.key_path).await?,
        })
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| TransportError::TlsMaterial {
            path: path.to_path_buf(),
            source,
        })
}

/// Validate a bare broker hostname (no scheme, path or port)
pub fn validate_endpoint(endpoint: &str) -> Result<&str, TransportError> {
    let host = endpoint.trim();
    let malformed = host.is_empty()
        || host.contains("://")
        || host.contains('/')
        || host.contains(char::is_whitespace);

    if malformed {
        return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(host)
}

/// Build MQTT options for a mutually authenticated TLS session
///
/// The broker is verified against the pinned CA only. rustls negotiates
/// TLS 1.2 or 1.3 and always verifies the peer certificate.
pub fn configure_mqtt_options(
    config: &MqttSection,
    tls: TlsMaterial,
) -> Result<MqttOptions, TransportError> {
    let host = validate_endpoint(&config.endpoint)?;

    let mut mqtt_options = MqttOptions::new(config.client_id.clone(), host, config.port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_session(true);

    let alpn = (config.port == 443).then(|| vec![AWS_IOT_ALPN.to_vec()]);
    let tls_config = TlsConfiguration::Simple {
        ca: tls.ca,
        alpn,
        client_auth: Some((tls.client_cert, tls.client_key)),
    };
    mqtt_options.set_transport(RumqttcTransport::tls_with_config(tls_config));

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn test_tls() -> TlsMaterial {
        TlsMaterial {
            ca: b"ca".to_vec(),
            client_cert: b"cert".to_vec(),
            client_key: b"key".to_vec(),
        }
    }

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.backoff_pattern, vec![1_000, 2_000, 5_000, 10_000]);
        assert_eq!(config.sustained_delay, 30_000);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();

        assert_eq!(config.calculate_backoff_delay(1), 1_000);
        assert_eq!(config.calculate_backoff_delay(2), 2_000);
        assert_eq!(config.calculate_backoff_delay(3), 5_000);
        assert_eq!(config.calculate_backoff_delay(4), 10_000);

        // Sustained delay after pattern exhausted
        assert_eq!(config.calculate_backoff_delay(5), 30_000);
        assert_eq!(config.calculate_backoff_delay(100), 30_000);
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let config = ReconnectConfig {
            backoff_pattern: vec![],
            sustained_delay: 500,
        };
        assert_eq!(config.calculate_backoff_delay(1), 500);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let config = AgentConfig::test_config();
        let options = configure_mqtt_options(&config.mqtt, test_tls()).unwrap();

        assert_eq!(
            options.broker_address(),
            ("broker.example.com".to_string(), 8883)
        );
        assert_eq!(options.client_id(), "dht22-kitchen");
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.clean_session());
    }

    #[test]
    fn test_invalid_endpoints() {
        assert!(validate_endpoint("mqtts://broker.example.com").is_err());
        assert!(validate_endpoint("broker.example.com/path").is_err());
        assert!(validate_endpoint("").is_err());
        assert!(validate_endpoint("bro ker").is_err());
        assert_eq!(
            validate_endpoint(" broker.example.com ").unwrap(),
            "broker.example.com"
        );
    }

    #[test]
    fn test_connect_errors_are_connect_failures() {
        let errors = vec![
            TransportError::InvalidEndpoint("x".to_string()),
            TransportError::ConnectFailed("refused".to_string().into()),
            TransportError::ConnectTimeout { secs: 30 },
            TransportError::TlsMaterial {
                path: PathBuf::from("cert.pem"),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
        ];

        for error in errors {
            assert_eq!(error.kind(), ErrorKind::TransportConnectFailure);
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_not_connected_is_disconnected_kind() {
        let error = TransportError::NotConnected {
            state: ConnectionState::Disconnected("io".to_string()),
        };
        assert_eq!(error.kind(), ErrorKind::TransportDisconnected);
        assert!(error.to_string().contains("Disconnected"));
    }

    #[test]
    fn test_tls_material_debug_redacts_key() {
        let rendered = format!("{:?}", test_tls());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("107, 101, 121"));
    }

    #[tokio::test]
    async fn test_load_missing_tls_material() {
        let mut config = AgentConfig::test_config();
        config.mqtt.ca_path = PathBuf::from("/nonexistent/AmazonRootCA1.pem");

        let result = TlsMaterial::load(&config.mqtt).await;
        assert!(matches!(
            result,
            Err(TransportError::TlsMaterial { ref path, .. }) if path.ends_with("AmazonRootCA1.pem")
        ));
    }
}
