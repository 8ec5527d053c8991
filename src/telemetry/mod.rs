//! Wire record construction and acknowledged delivery

pub mod publisher;
pub mod record;

pub use publisher::{Delivered, PublishError, TelemetryPublisher};
pub use record::{format_timestamp, round_half_even, TelemetryRecord, WIRE_DECIMALS};
