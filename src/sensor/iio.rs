//! Linux IIO implementation of the sensor port
//!
//! The kernel `dht11` driver (which also speaks DHT22/AM2302) exposes the
//! sensor as an industrial-I/O device once the `dht11` device-tree overlay
//! is loaded with `gpiopin=N`. Each read of `in_temp_input` or
//! `in_humidityrelative_input` triggers a fresh bus transaction; checksum
//! and timing faults surface as `EIO`/`ETIMEDOUT` on the read.

use super::{RawSample, SensorDriver, SensorError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::trace;

pub const DEFAULT_IIO_ROOT: &str = "/sys/bus/iio/devices";

const DRIVER_NAME: &str = "dht11";
const TEMPERATURE_FILE: &str = "in_temp_input";
const HUMIDITY_FILE: &str = "in_humidityrelative_input";

/// DHT22 driver backed by the kernel IIO subsystem
#[derive(Debug, Clone)]
pub struct IioDht22Driver {
    root: PathBuf,
    device: Option<PathBuf>,
}

impl Default for IioDht22Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl IioDht22Driver {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_IIO_ROOT)
    }

    /// Discover devices below a different sysfs root
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            device: None,
        }
    }

    /// Always read from `device`, skipping discovery
    pub fn with_device(device: impl Into<PathBuf>) -> Self {
        Self {
            root: PathBuf::from(DEFAULT_IIO_ROOT),
            device: Some(device.into()),
        }
    }

    pub fn from_config(device: Option<&Path>) -> Self {
        match device {
            Some(device) => Self::with_device(device),
            None => Self::new(),
        }
    }

    /// Find the IIO device directory wired to `pin`
    ///
    /// A device matches when its device-tree node is named `dht11@<pin hex>`.
    /// A single `dht11` device whose node carries no pin is accepted as well.
    pub async fn resolve_device(&self, pin: u32) -> Result<PathBuf, SensorError> {
        if let Some(device) = &self.device {
            return Ok(device.clone());
        }

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| SensorError::io(&self.root, e))?;

        let mut candidates = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SensorError::io(&self.root, e))?
        {
            let dir = entry.path();
            if !is_iio_device_dir(&dir) || !is_dht_device(&dir).await {
                continue;
            }

            match node_pin(&dir).await {
                Some(node_pin) if node_pin == pin => return Ok(dir),
                node_pin => candidates.push((dir, node_pin)),
            }
        }

        match candidates.as_slice() {
            [(dir, None)] => Ok(dir.clone()),
            _ => Err(SensorError::DeviceNotFound(pin)),
        }
    }
}

#[async_trait]
impl SensorDriver for IioDht22Driver {
    async fn read(&self, pin: u32) -> Result<RawSample, SensorError> {
        let device = self.resolve_device(pin).await?;
        trace!(device = %device.display(), "Reading IIO channels");

        // Humidity and temperature are separate transactions on the wire
        let temperature = read_milli(&device.join(TEMPERATURE_FILE)).await?;
        let humidity = read_milli(&device.join(HUMIDITY_FILE)).await?;

        Ok(RawSample::new(temperature, humidity))
    }
}

fn is_iio_device_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("iio:device"))
}

async fn is_dht_device(dir: &Path) -> bool {
    tokio::fs::read_to_string(dir.join("name"))
        .await
        .is_ok_and(|name| name.trim() == DRIVER_NAME)
}

/// GPIO number encoded in the device-tree node name, if any
async fn node_pin(dir: &Path) -> Option<u32> {
    let node = tokio::fs::canonicalize(dir.join("of_node")).await.ok()?;
    parse_node_pin(node.file_name()?.to_str()?)
}

fn parse_node_pin(node_name: &str) -> Option<u32> {
    let (_, unit_address) = node_name.split_once('@')?;
    u32::from_str_radix(unit_address, 16).ok()
}

/// Read a sysfs value in thousandths and scale it to units
async fn read_milli(path: &Path) -> Result<f64, SensorError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SensorError::io(path, e))?;

    let value: i64 = raw.trim().parse().map_err(|_| SensorError::Parse {
        path: path.to_path_buf(),
        value: raw.trim().to_string(),
    })?;

    Ok(value as f64 / 1000.0)
}
