//! Impure I/O operations for the MQTT session
//!
//! [`MqttSession::connect`] performs the TLS handshake and MQTT CONNECT
//! synchronously and only returns once the broker sent CONNACK. After that
//! a supervisor task owns the rumqttc event loop for the lifetime of the
//! session: it keeps the connection alive, correlates PUBACKs and
//! reconnects in place with backoff when the link drops.

use super::ack::{AckTracker, PublishAcknowledgment};
use super::connection::{
    configure_mqtt_options, ConnectionState, ReconnectConfig, TlsMaterial, TransportError,
};
use super::event_router::{route_event, EventRoute};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use crate::config::MqttSection;
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument, Span};

/// Capacity of the client -> event loop request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `close` waits for the DISCONNECT to be flushed
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Live, mutually authenticated session with the broker
pub struct MqttSession {
    client: AsyncClient,
    endpoint: String,
    port: u16,
    client_id: String,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    acks: Arc<AckTracker>,
    reconnects: Arc<AtomicU32>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl MqttSession {
    /// Establish the session described by `config`
    ///
    /// Fails if the TLS material cannot be read, the handshake or CONNECT
    /// fails, or no CONNACK arrives within `connect_timeout_secs`.
    pub async fn connect(config: &MqttSection, span: Span) -> Result<Self, TransportError> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

        async {
            let tls = TlsMaterial::load(config).await?;
            let mqtt_options = configure_mqtt_options(config, tls)?;
            Self::connect_with_options(
                mqtt_options,
                connect_timeout,
                ReconnectConfig::default(),
                span.clone(),
            )
            .await
        }
        .instrument(span.clone())
        .await
    }

    /// Establish a session from prepared options
    pub async fn connect_with_options(
        mqtt_options: MqttOptions,
        connect_timeout: Duration,
        reconnect_config: ReconnectConfig,
        span: Span,
    ) -> Result<Self, TransportError> {
        let (endpoint, port) = mqtt_options.broker_address();
        let client_id = mqtt_options.client_id();

        info!(endpoint = %endpoint, port, client_id = %client_id, "Connecting to MQTT broker");

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        Self::wait_for_connack(&mut event_loop, connect_timeout).await?;
        HealthMonitor::log_state_transition(
            &ConnectionState::Connecting,
            &ConnectionState::Connected,
        );

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let acks = Arc::new(AckTracker::new());
        let reconnects = Arc::new(AtomicU32::new(0));

        let supervisor = tokio::spawn(
            supervise(
                event_loop,
                state_tx,
                shutdown_rx,
                acks.clone(),
                reconnects.clone(),
                reconnect_config,
            )
            .instrument(span.clone()),
        );

        Ok(Self {
            client,
            endpoint,
            port,
            client_id,
            state_rx,
            shutdown_tx,
            acks,
            reconnects,
            supervisor: Mutex::new(Some(supervisor)),
            span,
        })
    }

    /// Drive the event loop until CONNACK, an error, or the timeout
    async fn wait_for_connack(
        event_loop: &mut EventLoop,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let handshake = async {
            loop {
                match event_loop.poll().await {
                    Ok(event) => match route_event(&event) {
                        EventRoute::ConnectionAcknowledged { session_present } => {
                            debug!(session_present, "CONNACK received");
                            return Ok(());
                        }
                        route => trace!(?route, "Event before CONNACK"),
                    },
                    Err(e) => {
                        error!(error = %e, "Initial MQTT connection failed");
                        return Err(TransportError::ConnectFailed(Box::new(e)));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                secs: timeout.as_secs(),
            })?
    }

    pub fn endpoint(&self) -> (&str, u16) {
        (&self.endpoint, self.port)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Number of reconnection attempts since the session was established
    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Acknowledgments still waiting for the broker
    pub fn pending_acks(&self) -> usize {
        self.acks.pending()
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), TransportError> {
        let state = self.state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&state) {
            return Err(TransportError::NotConnected { state });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MqttSession {
    /// Enqueue a QoS 1, non-retained publish
    ///
    /// Refused with `NotConnected` while the session is reconnecting.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<PublishAcknowledgment, TransportError> {
        async {
            self.check_connection_state()?;

            let ack = self.acks.register();
            if let Err(e) = self
                .client
                .publish(topic, QoS::AtLeastOnce, false, payload)
                .await
            {
                self.acks.cancel_last();
                return Err(TransportError::PublishFailed(Box::new(e)));
            }

            trace!(topic, "Publish enqueued");
            Ok(ack)
        }
        .instrument(self.span.clone())
        .await
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Send DISCONNECT and stop the supervisor
    async fn close(&self) -> Result<(), TransportError> {
        let Some(mut handle) = self.supervisor.lock().await.take() else {
            return Ok(());
        };

        async {
            let mut result = Ok(());
            if self.is_connected() {
                if let Err(e) = self.client.disconnect().await {
                    warn!(error = %e, "Failed to enqueue DISCONNECT");
                    result = Err(TransportError::DisconnectFailed(Box::new(e)));
                    let _ = self.shutdown_tx.send(true);
                }
            } else {
                let _ = self.shutdown_tx.send(true);
            }

            match tokio::time::timeout(CLOSE_GRACE_PERIOD, &mut handle).await {
                Ok(Ok(())) => info!("MQTT session closed"),
                Ok(Err(e)) => warn!(error = %e, "Session supervisor ended with error"),
                Err(_) => {
                    warn!("Session supervisor didn't stop gracefully, aborting");
                    let _ = self.shutdown_tx.send(true);
                    handle.abort();
                }
            }

            self.acks.fail_all("session closed");
            result
        }
        .instrument(self.span.clone())
        .await
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.supervisor.get_mut().take() {
            handle.abort();
        }
    }
}

/// Supervisor loop owning the event loop
///
/// Polling the event loop after an error makes rumqttc reconnect with the
/// same options, so the session is recovered in place.
async fn supervise(
    mut event_loop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
    acks: Arc<AckTracker>,
    reconnects: Arc<AtomicU32>,
    reconnect_config: ReconnectConfig,
) {
    info!("Starting MQTT session supervisor");
    let mut reconnect_attempts = 0u32;

    loop {
        let event = tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received, stopping session supervisor");
                    break;
                }
                continue;
            }
            event = event_loop.poll() => event,
        };

        match event {
            Ok(event) => match route_event(&event) {
                EventRoute::ConnectionAcknowledged { session_present } => {
                    transition(&state_tx, ConnectionEvent::ConnAckReceived);
                    debug!(session_present, reconnect_attempts, "Session re-established");
                    reconnect_attempts = 0;
                }
                EventRoute::PublishSent(packet_id) => {
                    if !acks.on_publish_sent(packet_id) {
                        debug!(packet_id, "Outgoing publish without waiter (retransmission)");
                    }
                }
                EventRoute::PublishAcknowledged(packet_id) => {
                    if !acks.on_puback(packet_id) {
                        debug!(packet_id, "PUBACK without waiter");
                    }
                }
                EventRoute::PingResponse => trace!("Keep-alive ping answered"),
                EventRoute::Disconnected => {
                    transition(&state_tx, ConnectionEvent::DisconnectedByBroker);
                    acks.fail_all("broker disconnected");
                }
                EventRoute::DisconnectSent => {
                    info!("DISCONNECT sent to broker");
                    break;
                }
                EventRoute::Other(event) => trace!(event = %event, "MQTT event"),
            },
            Err(e) => {
                let reason = e.to_string();
                // rumqttc queued the unacknowledged publishes for resending; their
                // callers are failed below, so a resend would have no waiter
                let dropped = event_loop.pending.len();
                event_loop.pending.clear();
                if dropped > 0 {
                    debug!(dropped, "Discarded publishes queued for retransmission");
                }

                transition(&state_tx, ConnectionEvent::NetworkError(reason.clone()));
                let failed = acks.fail_all(&reason);
                if failed > 0 {
                    warn!(failed, "Failed outstanding acknowledgments after connection loss");
                }

                let decision = HealthMonitor::should_attempt_reconnection(
                    reconnect_attempts,
                    &reconnect_config,
                    *shutdown_rx.borrow(),
                );
                match decision {
                    ReconnectionDecision::Proceed { attempt, delay_ms } => {
                        reconnect_attempts = attempt;
                        reconnects.fetch_add(1, Ordering::Relaxed);
                        info!(attempt, delay_ms, "Reconnecting after delay");

                        if !interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                            break;
                        }
                        transition(&state_tx, ConnectionEvent::ReconnectionStarted(attempt));
                    }
                    ReconnectionDecision::AbortShutdownRequested => {
                        info!("Shutdown signal received, stopping reconnection");
                        break;
                    }
                }
            }
        }
    }

    transition(&state_tx, ConnectionEvent::Closed);
    acks.fail_all("session closed");
    info!("MQTT session supervisor stopped");
}

fn transition(state_tx: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
    let next = HealthMonitor::determine_next_state(event);
    let previous = state_tx.send_replace(next.clone());
    if previous != next {
        HealthMonitor::log_state_transition(&previous, &next);
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(delay_ms);
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
            }
        }
    }
}
