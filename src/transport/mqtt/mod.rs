//! MQTT 3.1.1 session over mutually authenticated TLS
//!
//! Pure functions are separated from I/O operations:
//!
//! - [`connection`] - Connection state, TLS material and client options
//! - [`event_router`] - Routing of event loop events
//! - [`health_monitor`] - State transitions and reconnection decisions
//! - [`ack`] - PUBACK correlation for QoS 1 publishes
//! - [`session`] - Impure I/O operations and supervision
//!
//! # Usage
//!
//! ```rust,no_run
//! use dht22_publisher::config::AgentConfig;
//! use dht22_publisher::transport::{mqtt::MqttSession, Transport};
//!
//! # tokio_test::block_on(async {
//! let config = AgentConfig::load_from_file(std::path::Path::new("config.toml"))?;
//! let session = MqttSession::connect(&config.mqtt, tracing::Span::current()).await?;
//!
//! let ack = session.publish(&config.mqtt.topic, b"{}".to_vec()).await?;
//! ack.wait().await?;
//! session.close().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod ack;
pub mod connection;
pub mod event_router;
pub mod health_monitor;
pub mod session;

pub use ack::{AckError, AckResult, AckTracker, PublishAcknowledgment};
pub use connection::{
    configure_mqtt_options, ConnectionState, ReconnectConfig, TlsMaterial, TransportError,
};
pub use event_router::{route_event, EventRoute};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use session::MqttSession;
