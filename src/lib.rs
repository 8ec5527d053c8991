//! dht22-publisher
//!
//! A long-running telemetry agent for small edge devices. It samples a
//! DHT22/AM2302 temperature and humidity sensor on a fixed interval, stamps
//! each sample with its capture time and a location tag, and publishes it
//! as JSON to an MQTT broker over mutually authenticated TLS, waiting for
//! the broker's acknowledgment before the next cycle.
//!
//! # Overview
//!
//! - [`sensor`] - single-shot driver port, IIO driver and the retrying reader
//! - [`transport`] - MQTT session with TLS, keep-alive and background reconnect
//! - [`telemetry`] - wire record encoding and QoS 1 publishing
//! - [`scheduler`] - the Polling/Sleeping loop
//!
//! # Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use dht22_publisher::sensor::{RawSample, Reading};
//! use dht22_publisher::telemetry::TelemetryRecord;
//!
//! let captured_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let reading = Reading::complete(captured_at, RawSample::new(22.4567, 45.12345));
//!
//! let record = TelemetryRecord::from_reading(&reading, "kitchen").unwrap();
//! assert_eq!(record.temperature, 22.457);
//! assert_eq!(record.humidity, 45.123);
//! assert_eq!(record.timestamp, "2024-01-01T00:00:00.000000Z");
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod scheduler;
pub mod sensor;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use config::{AgentConfig, ConfigError};
pub use error::{AgentError, AgentResult, ErrorKind};
pub use scheduler::{CycleOutcome, PollingScheduler, SchedulerSettings, SchedulerState};
pub use telemetry::{TelemetryPublisher, TelemetryRecord};
pub use transport::mqtt::MqttSession;
