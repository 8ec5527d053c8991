//! The polling loop
//!
//! An explicit two-state machine: `Polling` acquires a reading, builds the
//! wire record and publishes it; `Sleeping` waits the fixed interval. Cycles
//! run strictly one after another so publish order follows sample order. A
//! failed reading or a failed publish consumes the same interval as a
//! success.

use crate::config::AgentConfig;
use crate::error::{error_chain, AgentError, ErrorKind};
use crate::observability::{AgentStats, StatsSnapshot};
use crate::sensor::{Reading, SensorDriver, SensorReader};
use crate::telemetry::{Delivered, TelemetryPublisher, TelemetryRecord};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Polling,
    Sleeping,
}

/// What one Polling step did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Published {
        record: TelemetryRecord,
        delivered: Delivered,
    },
    SensorFailed {
        attempts: u32,
    },
    PublishFailed {
        kind: ErrorKind,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub pin: u32,
    pub location: String,
    pub interval: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            pin: config.main.dht22_pin,
            location: config.main.location.clone(),
            interval: config.sleep_interval(),
        }
    }
}

pub struct PollingScheduler<D, T> {
    reader: SensorReader<D>,
    publisher: TelemetryPublisher<T>,
    settings: SchedulerSettings,
    stats: Arc<AgentStats>,
    state: SchedulerState,
    span: Span,
}

impl<D: SensorDriver, T: Transport> PollingScheduler<D, T> {
    pub fn new(
        reader: SensorReader<D>,
        publisher: TelemetryPublisher<T>,
        settings: SchedulerSettings,
        stats: Arc<AgentStats>,
        span: Span,
    ) -> Self {
        Self {
            reader,
            publisher,
            settings,
            stats,
            state: SchedulerState::Polling,
            span,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> &Arc<AgentStats> {
        &self.stats
    }

    /// Execute exactly one state transition
    ///
    /// Returns the cycle outcome after Polling, `None` after Sleeping.
    pub async fn step(&mut self) -> Option<CycleOutcome> {
        match self.state {
            SchedulerState::Polling => {
                let outcome = self.poll_cycle().instrument(self.span.clone()).await;
                self.state = SchedulerState::Sleeping;
                Some(outcome)
            }
            SchedulerState::Sleeping => {
                tokio::time::sleep(self.settings.interval).await;
                self.state = SchedulerState::Polling;
                None
            }
        }
    }

    /// Acquire, encode and publish one reading
    pub async fn poll_cycle(&self) -> CycleOutcome {
        self.stats.cycle_started();

        let reading = self.reader.acquire(self.settings.pin).await;
        let record = match TelemetryRecord::from_reading(&reading, &self.settings.location) {
            Some(record) => record,
            None => {
                self.stats.reading_failed();
                let attempts = match reading {
                    Reading::Failed { attempts, last_error, .. } => {
                        let failure = AgentError::SensorAcquisition {
                            attempts,
                            last: last_error,
                        };
                        warn!(
                            error_kind = %failure.kind(),
                            error = %error_chain(&failure),
                            "Skipping cycle, no sensor reading"
                        );
                        attempts
                    }
                    Reading::Complete { .. } => 0,
                };
                return CycleOutcome::SensorFailed { attempts };
            }
        };

        self.stats.reading_complete();
        debug!(
            timestamp = %record.timestamp,
            temperature = record.temperature,
            humidity = record.humidity,
            "Built telemetry record"
        );

        match self.publisher.publish(&record).await {
            Ok(delivered) => {
                self.stats.publish_acknowledged(delivered.bytes);
                debug!(
                    packet_id = delivered.packet_id,
                    bytes = delivered.bytes,
                    topic = %self.publisher.topic(),
                    "Record acknowledged by broker"
                );
                CycleOutcome::Published { record, delivered }
            }
            Err(e) => {
                self.stats.publish_failed();
                let failure = AgentError::from(e);
                let kind = failure.kind();
                error!(
                    error_kind = %kind,
                    error = %error_chain(&failure),
                    timestamp = %record.timestamp,
                    "Publish failed, record dropped"
                );
                CycleOutcome::PublishFailed { kind }
            }
        }
    }

    /// Run until `shutdown` turns true
    ///
    /// Shutdown interrupts a sleep, an acquisition or a blocked publish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> StatsSnapshot {
        info!(
            parent: &self.span,
            pin = self.settings.pin,
            location = %self.settings.location,
            interval_secs = self.settings.interval.as_secs(),
            "Starting polling loop"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                outcome = self.step() => {
                    if outcome.is_some() {
                        debug!(parent: &self.span, stats = ?self.stats.snapshot(), "Cycle complete");
                    }
                }
            }
        }

        let snapshot = self.stats.snapshot();
        info!(
            parent: &self.span,
            cycles = snapshot.cycles,
            readings_failed = snapshot.readings_failed,
            publishes_acknowledged = snapshot.publishes_acknowledged,
            publishes_failed = snapshot.publishes_failed,
            "Polling loop stopped"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{RawSample, RetryPolicy};
    use crate::testing::{MockSensorDriver, MockTransport};
    use crate::transport::ConnectionState;

    type TestScheduler = PollingScheduler<Arc<MockSensorDriver>, Arc<MockTransport>>;

    fn scheduler(driver: Arc<MockSensorDriver>, transport: Arc<MockTransport>) -> TestScheduler {
        PollingScheduler::new(
            SensorReader::new(
                driver,
                RetryPolicy::new(3, Duration::from_secs(2)),
                Span::none(),
            ),
            TelemetryPublisher::new(transport, "sensors/kitchen", Span::none()),
            SchedulerSettings {
                pin: 4,
                location: "kitchen".to_string(),
                interval: Duration::from_secs(60),
            },
            Arc::new(AgentStats::new()),
            Span::none(),
        )
    }

    #[test]
    fn test_settings_from_config() {
        let settings = SchedulerSettings::from_config(&AgentConfig::test_config());
        assert_eq!(settings.pin, 4);
        assert_eq!(settings.location, "kitchen");
        assert_eq!(settings.interval, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_alternates_states() {
        let driver = Arc::new(MockSensorDriver::always(RawSample::new(22.4567, 45.12345)));
        let transport = Arc::new(MockTransport::new());
        let mut scheduler = scheduler(driver, transport.clone());

        assert_eq!(scheduler.state(), SchedulerState::Polling);
        let outcome = scheduler.step().await;
        assert!(matches!(outcome, Some(CycleOutcome::Published { .. })));
        assert_eq!(scheduler.state(), SchedulerState::Sleeping);

        let start = tokio::time::Instant::now();
        assert_eq!(scheduler.step().await, None);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(scheduler.state(), SchedulerState::Polling);
        assert_eq!(transport.publish_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reading_never_publishes() {
        let driver = Arc::new(MockSensorDriver::always_failing());
        let transport = Arc::new(MockTransport::new());
        let mut scheduler = scheduler(driver.clone(), transport.clone());

        let outcome = scheduler.step().await;

        assert_eq!(outcome, Some(CycleOutcome::SensorFailed { attempts: 3 }));
        assert_eq!(driver.calls(), 3);
        assert_eq!(transport.publish_attempts(), 0);
        assert_eq!(scheduler.stats().snapshot().readings_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_continues_to_sleep() {
        let driver = Arc::new(MockSensorDriver::always(RawSample::new(20.0, 40.0)));
        let transport = Arc::new(MockTransport::new());
        transport.set_state(ConnectionState::Reconnecting(2));
        let mut scheduler = scheduler(driver, transport.clone());

        let outcome = scheduler.step().await;

        assert_eq!(
            outcome,
            Some(CycleOutcome::PublishFailed {
                kind: ErrorKind::TransportDisconnected
            })
        );
        assert_eq!(scheduler.state(), SchedulerState::Sleeping);
        assert_eq!(scheduler.stats().snapshot().publishes_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let driver = Arc::new(MockSensorDriver::always(RawSample::new(20.0, 40.0)));
        let transport = Arc::new(MockTransport::new());
        let scheduler = scheduler(driver, transport.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.run(shutdown_rx));
        // Three polls: t=0, t=60, t=120
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown_tx.send(true).unwrap();

        let snapshot = handle.await.unwrap();
        assert_eq!(snapshot.cycles, 3);
        assert_eq!(snapshot.publishes_acknowledged, 3);
        assert_eq!(transport.publish_count(), 3);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_already_shut_down() {
        let driver = Arc::new(MockSensorDriver::always(RawSample::new(20.0, 40.0)));
        let transport = Arc::new(MockTransport::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        let snapshot = scheduler(driver, transport.clone()).run(shutdown_rx).await;

        assert_eq!(snapshot.cycles, 0);
        assert_eq!(transport.publish_attempts(), 0);
    }
}
