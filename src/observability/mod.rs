//! Observability: structured logging and operational counters

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LogSettings};
pub use metrics::{AgentStats, StatsSnapshot};

// Span macros for structured logging
pub use logging::{mqtt_span, publish_span, scheduler_span, sensor_span};
