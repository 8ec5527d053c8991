//! Agent-level error types
//!
//! Each component owns its error enum. [`AgentError`] aggregates them and
//! classifies every failure into one of the operational [`ErrorKind`]s that
//! decide whether the agent skips a cycle, carries on, or exits.

use crate::config::ConfigError;
use crate::sensor::SensorError;
use crate::telemetry::PublishError;
use crate::transport::mqtt::TransportError;
use thiserror::Error;

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Sensor acquisition failed after {attempts} attempts: {last}")]
    SensorAcquisition { attempts: u32, last: SensorError },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Operational classification of failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Sensor gave no usable value this cycle; the cycle is skipped
    SensorAcquisitionFailure,
    /// The first broker session could not be established; fatal
    TransportConnectFailure,
    /// The session dropped; recovered in the background
    TransportDisconnected,
    /// A record could not be delivered; logged and the loop continues
    PublishFailure,
    /// Configuration is unusable; fatal
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SensorAcquisitionFailure => "SensorAcquisitionFailure",
            ErrorKind::TransportConnectFailure => "TransportConnectFailure",
            ErrorKind::TransportDisconnected => "TransportDisconnected",
            ErrorKind::PublishFailure => "PublishFailure",
            ErrorKind::Configuration => "Configuration",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Whether the agent must stop when this kind of error surfaces
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransportConnectFailure | ErrorKind::Configuration
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::SensorAcquisition { .. } => ErrorKind::SensorAcquisitionFailure,
            AgentError::Transport(e) => e.kind(),
            AgentError::Publish(e) => e.kind(),
            AgentError::Config(_) => ErrorKind::Configuration,
            AgentError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Render an error with all of its sources, outermost first
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.ends_with(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}
