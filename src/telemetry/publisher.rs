//! Acknowledgment-blocking publish of telemetry records

use super::record::TelemetryRecord;
use crate::error::ErrorKind;
use crate::transport::mqtt::AckError;
use crate::transport::{Transport, TransportError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, Instrument, Span};

/// Publish errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize record: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    AckLost(#[from] AckError),
    #[error("No PUBACK within {secs}s")]
    AckTimeout { secs: u64 },
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::Transport(e) => e.kind(),
            PublishError::AckLost(_) => ErrorKind::TransportDisconnected,
            PublishError::Serialization(_) | PublishError::AckTimeout { .. } => {
                ErrorKind::PublishFailure
            }
        }
    }
}

/// A record the broker has acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub packet_id: u16,
    pub bytes: usize,
}

/// Publishes records to one topic at QoS 1
///
/// Never retries; a failure is returned to the caller.
pub struct TelemetryPublisher<T> {
    transport: T,
    topic: String,
    ack_timeout: Option<Duration>,
    span: Span,
}

impl<T: Transport> TelemetryPublisher<T> {
    pub fn new(transport: T, topic: impl Into<String>, span: Span) -> Self {
        Self {
            transport,
            topic: topic.into(),
            ack_timeout: None,
            span,
        }
    }

    /// Bound the wait for PUBACK; `None` waits until ack or disconnect
    pub fn with_ack_timeout(mut self, ack_timeout: Option<Duration>) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Publish `record` and wait for the broker's acknowledgment
    pub async fn publish(&self, record: &TelemetryRecord) -> Result<Delivered, PublishError> {
        async {
            let payload = record.to_json().map_err(PublishError::Serialization)?;
            let bytes = payload.len();

            let ack = self.transport.publish(&self.topic, payload).await?;
            debug!(topic = %self.topic, bytes, "Waiting for PUBACK");

            let packet_id = match self.ack_timeout {
                Some(limit) => tokio::time::timeout(limit, ack.wait())
                    .await
                    .map_err(|_| PublishError::AckTimeout {
                        secs: limit.as_secs(),
                    })??,
                None => ack.wait().await?,
            };

            Ok(Delivered { packet_id, bytes })
        }
        .instrument(self.span.clone())
        .await
    }
}
