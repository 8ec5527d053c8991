//! DHT22 sensor acquisition
//!
//! The [`SensorDriver`] port performs a single low-level read. The
//! [`SensorReader`] wraps a driver with an explicit [`RetryPolicy`] and turns
//! the outcome into a [`Reading`], which is either complete or failed, never
//! partial.
//!
//! - [`reading`] - `RawSample` and `Reading` value types
//! - [`reader`] - retrying reader
//! - [`iio`] - Linux IIO (`dht11` kernel driver) implementation of the port

pub mod iio;
pub mod reader;
pub mod reading;

pub use iio::IioDht22Driver;
pub use reader::{RetryPolicy, SensorReader};
pub use reading::{RawSample, Reading};

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a single low-level sensor read
#[derive(Debug, Clone, Error)]
pub enum SensorError {
    #[error("No DHT22 device found for GPIO {0}")]
    DeviceNotFound(u32),
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Unparseable value '{value}' in {}", path.display())]
    Parse { path: PathBuf, value: String },
    #[error("Reading out of range: temperature {temperature_celsius}, humidity {humidity_percent}")]
    OutOfRange {
        temperature_celsius: f64,
        humidity_percent: f64,
    },
}

impl SensorError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

/// Single-shot access to a temperature/humidity sensor
///
/// Implementations perform exactly one read per call and never retry;
/// retrying is the [`SensorReader`]'s job.
#[async_trait::async_trait]
pub trait SensorDriver: Send + Sync {
    async fn read(&self, pin: u32) -> Result<RawSample, SensorError>;
}

#[async_trait::async_trait]
impl<D: SensorDriver + ?Sized> SensorDriver for Arc<D> {
    async fn read(&self, pin: u32) -> Result<RawSample, SensorError> {
        (**self).read(pin).await
    }
}
