//! Testing utilities and mock implementations
//!
//! Mocks for the sensor driver and broker transport, so the agent can be
//! tested without hardware or an MQTT broker.

pub mod mocks;

pub use mocks::*;
