//! Mock implementations for testing
//!
//! Provides a mock `SensorDriver` and a mock `Transport` so the reader,
//! publisher and scheduler can be exercised without hardware or a broker.

use crate::sensor::{RawSample, SensorDriver, SensorError};
use crate::transport::mqtt::AckTracker;
use crate::transport::{ConnectionState, PublishAcknowledgment, Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The error the kernel driver reports when the sensor doesn't answer
pub fn sensor_timeout() -> SensorError {
    SensorError::io(
        "/sys/bus/iio/devices/iio:device0/in_temp_input",
        std::io::Error::new(std::io::ErrorKind::TimedOut, "Connection timed out"),
    )
}

/// Mock sensor driver
///
/// Serves scripted results in order; once the script is exhausted every
/// further read returns the fallback.
#[derive(Debug)]
pub struct MockSensorDriver {
    script: Mutex<VecDeque<Result<RawSample, SensorError>>>,
    fallback: Result<RawSample, SensorError>,
    pins: Mutex<Vec<u32>>,
}

impl MockSensorDriver {
    pub fn always(sample: RawSample) -> Self {
        Self::with_fallback(Vec::new(), Ok(sample))
    }

    pub fn always_failing() -> Self {
        Self::with_fallback(Vec::new(), Err(sensor_timeout()))
    }

    /// Serve `script`, then keep failing
    pub fn scripted(script: Vec<Result<RawSample, SensorError>>) -> Self {
        Self::with_fallback(script, Err(sensor_timeout()))
    }

    pub fn with_fallback(
        script: Vec<Result<RawSample, SensorError>>,
        fallback: Result<RawSample, SensorError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            pins: Mutex::new(Vec::new()),
        }
    }

    /// Number of low-level reads performed
    pub fn calls(&self) -> usize {
        lock(&self.pins).len()
    }

    /// Pin passed to every read, in order
    pub fn pins(&self) -> Vec<u32> {
        lock(&self.pins).clone()
    }
}

#[async_trait]
impl SensorDriver for MockSensorDriver {
    async fn read(&self, pin: u32) -> Result<RawSample, SensorError> {
        lock(&self.pins).push(pin);
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// How the mock broker acknowledges publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// PUBACK arrives immediately
    Immediate,
    /// PUBACK only arrives when the test calls `acknowledge`
    Manual,
}

/// A message accepted by the mock transport
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub packet_id: u16,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or_default()
    }

    pub fn payload_json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

/// Mock transport for testing
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<ConnectionState>,
    ack_mode: AckMode,
    acks: AckTracker,
    published: Mutex<Vec<PublishedMessage>>,
    attempts: AtomicUsize,
    next_packet_id: AtomicU16,
    closed: AtomicBool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::with_ack_mode(AckMode::Immediate)
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ack_mode(ack_mode: AckMode) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Connected),
            ack_mode,
            acks: AckTracker::new(),
            published: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            next_packet_id: AtomicU16::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    /// Simulate the link dropping: outstanding acknowledgments fail
    pub fn drop_connection(&self, reason: &str) -> usize {
        self.set_state(ConnectionState::Disconnected(reason.to_string()));
        self.acks.fail_all(reason)
    }

    /// Deliver the PUBACK for a held publish
    pub fn acknowledge(&self, packet_id: u16) -> bool {
        self.acks.on_puback(packet_id)
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.pending()
    }

    /// Messages accepted for delivery
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    pub fn publish_count(&self) -> usize {
        lock(&self.published).len()
    }

    /// Every publish call, including ones refused while not connected
    pub fn publish_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<PublishAcknowledgment, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let state = lock(&self.state).clone();
        if state != ConnectionState::Connected {
            return Err(TransportError::NotConnected { state });
        }

        let packet_id = self.next_packet_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            packet_id,
        });

        match self.ack_mode {
            AckMode::Immediate => Ok(PublishAcknowledgment::resolved(packet_id)),
            AckMode::Manual => {
                let ack = self.acks.register();
                self.acks.on_publish_sent(packet_id);
                Ok(ack)
            }
        }
    }

    fn connection_state(&self) -> ConnectionState {
        lock(&self.state).clone()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.drop_connection("session closed");
        Ok(())
    }
}
