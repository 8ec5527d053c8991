//! Transport layer for telemetry delivery
//!
//! The [`Transport`] trait abstracts the broker session so the publisher
//! and scheduler can be driven by a mock in tests.

use std::sync::Arc;

pub mod mqtt;

pub use mqtt::{ConnectionState, PublishAcknowledgment, TransportError};

/// Publish-only session with a message broker
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Hand a payload to the session for at-least-once delivery
    ///
    /// Returns once the message is enqueued. The acknowledgment resolves
    /// when the broker confirms receipt.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<PublishAcknowledgment, TransportError>;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), ConnectionState::Connected)
    }

    /// Close the session, releasing the connection
    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<PublishAcknowledgment, TransportError> {
        (**self).publish(topic, payload).await
    }

    fn connection_state(&self) -> ConnectionState {
        (**self).connection_state()
    }

    async fn close(&self) -> Result<(), TransportError> {
        (**self).close().await
    }
}
