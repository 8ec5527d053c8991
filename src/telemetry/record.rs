//! The canonical wire record
//!
//! Encoding is a pure function of a complete [`Reading`] and the configured
//! location: field order is fixed by the struct, values are rounded
//! half-to-even to [`WIRE_DECIMALS`] places and the timestamp always carries
//! six fractional digits and a literal `Z`.

use crate::sensor::Reading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decimal places kept for temperature and humidity on the wire
pub const WIRE_DECIMALS: u32 = 3;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Largest magnitude at which a scaled f64 still has a fractional part
const MAX_EXACT_SCALED: f64 = 4_503_599_627_370_496.0; // 2^52

/// One published sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: String,
    pub location: String,
    pub temperature: f64,
    pub humidity: f64,
}

impl TelemetryRecord {
    /// Build the record for a complete reading
    ///
    /// Returns `None` for a failed reading; there is nothing to publish.
    pub fn from_reading(reading: &Reading, location: &str) -> Option<Self> {
        match reading {
            Reading::Complete {
                captured_at,
                humidity_percent,
                temperature_celsius,
            } => Some(Self {
                timestamp: format_timestamp(captured_at),
                location: location.to_string(),
                temperature: round_half_even(*temperature_celsius, WIRE_DECIMALS),
                humidity: round_half_even(*humidity_percent, WIRE_DECIMALS),
            }),
            Reading::Failed { .. } => None,
        }
    }

    /// Compact JSON encoding
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Format as ISO-8601 UTC with microseconds, e.g. `2024-01-01T00:00:00.123456Z`
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Round to `decimals` places, ties to even, judged on the exact binary value
///
/// `0.0625` is a true tie and goes to `0.062`; `0.0635` is stored slightly
/// above the tie and goes to `0.064`.
pub fn round_half_even(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let magnitude = value.abs();
    let scaled = magnitude * factor;

    if !scaled.is_finite() || scaled >= MAX_EXACT_SCALED {
        return value;
    }

    // Exact error of the multiplication; decides ties the product rounded onto
    let residual = magnitude.mul_add(factor, -scaled);
    let floor = scaled.floor();
    let fraction = scaled - floor;

    let round_up = if fraction > 0.5 {
        true
    } else if fraction < 0.5 {
        false
    } else if residual != 0.0 {
        residual > 0.0
    } else {
        floor % 2.0 != 0.0
    };

    let rounded = if round_up { floor + 1.0 } else { floor };
    if rounded == 0.0 {
        return 0.0;
    }
    (rounded / factor).copysign(value)
}
