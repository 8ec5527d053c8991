//! Structured logging system using tracing crate
//!
//! Components don't log to ambient state of their own: each receives a
//! `tracing::Span` at construction (built with the span macros below) and
//! logs inside it, so every event carries the component and its context.
//!
//! ## Log Format Options
//!
//! - `json` - Structured JSON format for log shipping from the device
//! - `pretty` - Human-readable format with colors and indentation
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ## Examples
//!
//! ```bash
//! LOG_FORMAT=json LOG_LEVEL=INFO ./dht22-publisher
//! LOG_FORMAT=compact LOG_LEVEL=DEBUG ./dht22-publisher -c config.toml
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies whose chatter is capped at warn
const QUIET_DEPENDENCIES: &[&str] = &["rumqttc=warn", "rustls=warn", "tokio=warn"];

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Resolved logging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            include_spans: false,
        }
    }
}

impl LogSettings {
    /// Build settings from raw `LOG_LEVEL`, `LOG_FORMAT`, `LOG_SPANS` values
    pub fn from_values(level: Option<&str>, format: Option<&str>, spans: Option<&str>) -> Self {
        Self {
            level: level.map(parse_level).unwrap_or(Level::INFO),
            format: format.map(LogFormat::parse).unwrap_or(LogFormat::Json),
            include_spans: spans
                .map(|s| s.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    pub fn from_env() -> Self {
        let level = env::var("LOG_LEVEL").ok();
        let format = env::var("LOG_FORMAT").ok();
        let spans = env::var("LOG_SPANS").ok();
        Self::from_values(level.as_deref(), format.as_deref(), spans.as_deref())
    }

    /// Raise the level by command-line verbosity (`-v` debug, `-vv` trace)
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        let requested = match verbose {
            0 => return self,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        // Level ordering: TRACE > DEBUG > INFO > WARN > ERROR
        if requested > self.level {
            self.level = requested;
        }
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn filter(&self) -> EnvFilter {
        // Allow RUST_LOG to override
        if let Ok(rust_log) = env::var("RUST_LOG") {
            return EnvFilter::new(rust_log);
        }

        QUIET_DEPENDENCIES.iter().fold(
            EnvFilter::new(self.level.to_string()),
            |filter, directive| match directive.parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(_) => filter,
            },
        )
    }
}

/// Parse a `LOG_LEVEL` value, defaulting to INFO
pub fn parse_level(s: &str) -> Level {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Install the global subscriber
///
/// Returns false if a subscriber was already installed.
pub fn init_logging(settings: LogSettings) -> bool {
    let subscriber = tracing_subscriber::registry().with(settings.filter());

    let installed = match settings.format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_events(settings.span_events()),
            )
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(settings.span_events()),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(settings.span_events()),
            )
            .try_init(),
    };
    installed.is_ok()
}

/// Span for sensor acquisition
#[macro_export]
macro_rules! sensor_span {
    ($($field:tt)*) => {
        tracing::info_span!("sensor", $($field)*)
    };
}

/// Span for the broker session
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_session", $($field)*)
    };
}

/// Span for record publishing
#[macro_export]
macro_rules! publish_span {
    ($($field:tt)*) => {
        tracing::info_span!("publish", $($field)*)
    };
}

/// Span for the polling loop
#[macro_export]
macro_rules! scheduler_span {
    ($($field:tt)*) => {
        tracing::info_span!("scheduler", $($field)*)
    };
}

pub use {mqtt_span, publish_span, scheduler_span, sensor_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        let cases = [
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Info", Level::INFO),
            ("DEBUG", Level::DEBUG),
            (" trace ", Level::TRACE),
            ("verbose", Level::INFO),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_level(input), expected, "Failed for input: {input}");
        }
    }

    #[test]
    fn test_settings_defaults() {
        let settings = LogSettings::from_values(None, None, None);
        assert_eq!(settings, LogSettings::default());
    }

    #[test]
    fn test_settings_from_values() {
        let settings = LogSettings::from_values(Some("debug"), Some("compact"), Some("TRUE"));
        assert_eq!(settings.level, Level::DEBUG);
        assert_eq!(settings.format, LogFormat::Compact);
        assert!(settings.include_spans);

        let settings = LogSettings::from_values(None, None, Some("yes"));
        assert!(!settings.include_spans);
    }

    #[test]
    fn test_verbosity_only_raises_level() {
        let base = LogSettings::default();
        assert_eq!(base.with_verbosity(0).level, Level::INFO);
        assert_eq!(base.with_verbosity(1).level, Level::DEBUG);
        assert_eq!(base.with_verbosity(3).level, Level::TRACE);

        let trace = LogSettings::from_values(Some("TRACE"), None, None);
        assert_eq!(trace.with_verbosity(1).level, Level::TRACE);
    }

    #[test]
    fn test_span_events() {
        let mut settings = LogSettings::default();
        assert_eq!(settings.span_events(), FmtSpan::NONE);
        settings.include_spans = true;
        assert_eq!(settings.span_events(), FmtSpan::NEW | FmtSpan::CLOSE);
    }

    #[test]
    fn test_span_macros_build_spans() {
        let _sensor = sensor_span!(pin = 4);
        let _mqtt = mqtt_span!(client_id = "dht22-kitchen");
        let _publish = publish_span!(topic = "sensors/kitchen");
        let _scheduler = scheduler_span!(location = "kitchen");
    }
}
