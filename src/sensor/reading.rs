//! Sensor value types

use super::SensorError;
use chrono::{DateTime, Utc};

/// DHT22 datasheet operating range
pub const TEMPERATURE_RANGE_CELSIUS: std::ops::RangeInclusive<f64> = -40.0..=80.0;
pub const HUMIDITY_RANGE_PERCENT: std::ops::RangeInclusive<f64> = 0.0..=100.0;

/// One successful low-level read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub temperature_celsius: f64,
    pub humidity_percent: f64,
}

impl RawSample {
    pub fn new(temperature_celsius: f64, humidity_percent: f64) -> Self {
        Self {
            temperature_celsius,
            humidity_percent,
        }
    }

    /// Reject values the sensor cannot physically produce
    pub fn validated(self) -> Result<Self, SensorError> {
        let plausible = self.temperature_celsius.is_finite()
            && self.humidity_percent.is_finite()
            && TEMPERATURE_RANGE_CELSIUS.contains(&self.temperature_celsius)
            && HUMIDITY_RANGE_PERCENT.contains(&self.humidity_percent);

        if plausible {
            Ok(self)
        } else {
            Err(SensorError::OutOfRange {
                temperature_celsius: self.temperature_celsius,
                humidity_percent: self.humidity_percent,
            })
        }
    }
}

/// Result of one poll cycle's acquisition
///
/// Both values are present or neither is.
#[derive(Debug, Clone)]
pub enum Reading {
    Complete {
        captured_at: DateTime<Utc>,
        humidity_percent: f64,
        temperature_celsius: f64,
    },
    Failed {
        captured_at: DateTime<Utc>,
        attempts: u32,
        last_error: SensorError,
    },
}

impl Reading {
    pub fn complete(captured_at: DateTime<Utc>, sample: RawSample) -> Self {
        Reading::Complete {
            captured_at,
            humidity_percent: sample.humidity_percent,
            temperature_celsius: sample.temperature_celsius,
        }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        match self {
            Reading::Complete { captured_at, .. } | Reading::Failed { captured_at, .. } => {
                *captured_at
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Reading::Complete { .. })
    }
}
