//! PUBACK correlation
//!
//! rumqttc assigns packet ids inside its event loop, so a publish call
//! cannot know its id up front. Waiters are queued in publish order and
//! bound to a packet id when the event loop reports the outgoing publish;
//! the matching PUBACK then resolves them. A dropped connection fails every
//! waiter so no caller blocks on an acknowledgment that cannot arrive.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

/// Outcome of waiting for a broker acknowledgment
pub type AckResult = Result<u16, AckError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AckError {
    #[error("Connection lost before PUBACK: {0}")]
    ConnectionLost(String),
}

/// Correlation token for a QoS 1 publish
///
/// Resolves with the MQTT packet id once the broker acknowledges receipt.
#[derive(Debug)]
pub struct PublishAcknowledgment {
    rx: oneshot::Receiver<AckResult>,
}

impl PublishAcknowledgment {
    /// Create a token together with the sender that resolves it
    pub fn channel() -> (oneshot::Sender<AckResult>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// An already-acknowledged token
    pub fn resolved(packet_id: u16) -> Self {
        let (tx, ack) = Self::channel();
        let _ = tx.send(Ok(packet_id));
        ack
    }

    /// Wait for the broker's acknowledgment
    pub async fn wait(self) -> AckResult {
        self.rx
            .await
            .unwrap_or_else(|_| Err(AckError::ConnectionLost("session closed".to_string())))
    }
}

type Waiter = oneshot::Sender<AckResult>;

#[derive(Debug, Default)]
struct AckState {
    queued: VecDeque<Waiter>,
    in_flight: HashMap<u16, Waiter>,
}

/// Shared between the publishing caller and the session supervisor
#[derive(Debug, Default)]
pub struct AckTracker {
    inner: Mutex<AckState>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, AckState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for the next publish handed to the client
    pub fn register(&self) -> PublishAcknowledgment {
        let (tx, ack) = PublishAcknowledgment::channel();
        self.state().queued.push_back(tx);
        ack
    }

    /// Drop the most recent registration after the publish could not be enqueued
    pub fn cancel_last(&self) {
        self.state().queued.pop_back();
    }

    /// Bind the oldest queued waiter to the packet id the client assigned
    ///
    /// Returns false for retransmissions that have no waiter.
    pub fn on_publish_sent(&self, packet_id: u16) -> bool {
        let mut state = self.state();
        if state.in_flight.contains_key(&packet_id) {
            return true;
        }
        match state.queued.pop_front() {
            Some(waiter) => {
                state.in_flight.insert(packet_id, waiter);
                true
            }
            None => false,
        }
    }

    /// Resolve the waiter for an acknowledged packet id
    pub fn on_puback(&self, packet_id: u16) -> bool {
        match self.state().in_flight.remove(&packet_id) {
            Some(waiter) => {
                // The caller may have stopped waiting (shutdown); nothing to do then
                let _ = waiter.send(Ok(packet_id));
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding waiter, returning how many were failed
    pub fn fail_all(&self, reason: &str) -> usize {
        let mut state = self.state();
        let queued = std::mem::take(&mut state.queued);
        let in_flight = std::mem::take(&mut state.in_flight);
        drop(state);

        let mut failed = 0;
        for waiter in queued.into_iter().chain(in_flight.into_values()) {
            let _ = waiter.send(Err(AckError::ConnectionLost(reason.to_string())));
            failed += 1;
        }
        failed
    }

    pub fn pending(&self) -> usize {
        let state = self.state();
        state.queued.len() + state.in_flight.len()
    }
}
