//! Pure health monitoring and reconnection logic for the MQTT session
//!
//! This module contains pure functions for connection state transitions
//! and reconnection decisions. The session supervisor feeds it events and
//! applies the results.

use super::connection::{ConnectionState, ReconnectConfig};
use tracing::{info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    ///
    /// Attempts are unlimited; only a shutdown request stops them.
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker => {
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(error) => ConnectionState::Disconnected(error),
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::Closed => ConnectionState::Disconnected("Session closed".to_string()),
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!(reason = %reason, "MQTT connection lost");
            }
            (_, ConnectionState::Reconnecting(attempt)) => {
                info!(attempt, "Starting reconnection attempt");
            }
            (ConnectionState::Reconnecting(_), ConnectionState::Connected) => {
                info!("Reconnection successful");
            }
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// CONNACK received from broker
    ConnAckReceived,
    /// Broker initiated disconnect
    DisconnectedByBroker,
    /// Network, TLS or protocol error
    NetworkError(String),
    /// Reconnection attempt started
    ReconnectionStarted(u32),
    /// Session closed locally
    Closed,
}
