//! End-to-end behavior of the polling loop against mock hardware and broker
//!
//! Time is paused, so sleeps and retry delays complete instantly while
//! keeping their ordering.

use dht22_publisher::error::ErrorKind;
use dht22_publisher::observability::AgentStats;
use dht22_publisher::scheduler::{CycleOutcome, PollingScheduler, SchedulerSettings, SchedulerState};
use dht22_publisher::sensor::{RawSample, RetryPolicy, SensorReader};
use dht22_publisher::telemetry::TelemetryPublisher;
use dht22_publisher::testing::{sensor_timeout, AckMode, MockSensorDriver, MockTransport};
use dht22_publisher::transport::ConnectionState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Span;

const INTERVAL: Duration = Duration::from_secs(60);

type Scheduler = PollingScheduler<Arc<MockSensorDriver>, Arc<MockTransport>>;

fn build(driver: &Arc<MockSensorDriver>, transport: &Arc<MockTransport>, attempts: u32) -> Scheduler {
    PollingScheduler::new(
        SensorReader::new(
            driver.clone(),
            RetryPolicy::new(attempts, Duration::from_secs(2)),
            Span::none(),
        ),
        TelemetryPublisher::new(transport.clone(), "sensors/kitchen", Span::none()),
        SchedulerSettings {
            pin: 4,
            location: "kitchen".to_string(),
            interval: INTERVAL,
        },
        Arc::new(AgentStats::new()),
        Span::none(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_complete_reading_is_published_as_record() {
    let driver = Arc::new(MockSensorDriver::always(RawSample::new(22.4567, 45.12345)));
    let transport = Arc::new(MockTransport::new());
    let mut scheduler = build(&driver, &transport, 15);

    let outcome = scheduler.step().await;

    let published = transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "sensors/kitchen");

    let payload = published[0].payload_json();
    assert_eq!(payload["location"], "kitchen");
    assert_eq!(payload["temperature"], 22.457);
    assert_eq!(payload["humidity"], 45.123);

    let timestamp = payload["timestamp"].as_str().unwrap();
    let fraction = timestamp.strip_suffix('Z').unwrap().rsplit_once('.').unwrap().1;
    assert_eq!(fraction.len(), 6);

    match outcome {
        Some(CycleOutcome::Published { record, delivered }) => {
            assert_eq!(record.timestamp, timestamp);
            assert_eq!(delivered.packet_id, published[0].packet_id);
        }
        other => panic!("expected a published cycle, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_failed_reads_skip_the_cycle() {
    let driver = Arc::new(MockSensorDriver::always_failing());
    let transport = Arc::new(MockTransport::new());
    let mut scheduler = build(&driver, &transport, 3);

    let start = Instant::now();
    let outcome = scheduler.step().await;

    assert_eq!(outcome, Some(CycleOutcome::SensorFailed { attempts: 3 }));
    assert_eq!(driver.calls(), 3);
    assert_eq!(transport.publish_attempts(), 0);
    assert_eq!(start.elapsed(), Duration::from_secs(4));

    // Sleeps the normal interval, then polls again
    assert_eq!(scheduler.state(), SchedulerState::Sleeping);
    assert_eq!(scheduler.step().await, None);
    assert_eq!(start.elapsed(), Duration::from_secs(4) + INTERVAL);
    assert_eq!(scheduler.state(), SchedulerState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_loop_recovers_after_failed_cycle() {
    let mut script: Vec<_> = (0..3).map(|_| Err(sensor_timeout())).collect();
    script.push(Ok(RawSample::new(19.5, 61.0)));
    let driver = Arc::new(MockSensorDriver::with_fallback(
        script,
        Ok(RawSample::new(19.5, 61.0)),
    ));
    let transport = Arc::new(MockTransport::new());
    let scheduler = build(&driver, &transport, 3);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(scheduler.run(shutdown_rx));
    // Cycle 1 fails (t=0..4), cycle 2 at t=64 succeeds on its first read
    tokio::time::sleep(Duration::from_secs(100)).await;
    shutdown_tx.send(true).unwrap();
    let stats = handle.await.unwrap();

    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.readings_failed, 1);
    assert_eq!(stats.readings_complete, 1);
    assert_eq!(stats.publishes_acknowledged, 1);
    assert_eq!(transport.publish_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_publish_during_reconnect_fails_and_loop_continues() {
    let driver = Arc::new(MockSensorDriver::always(RawSample::new(20.0, 40.0)));
    let transport = Arc::new(MockTransport::new());
    let mut scheduler = build(&driver, &transport, 15);

    transport.set_state(ConnectionState::Reconnecting(1));
    let outcome = scheduler.step().await;
    assert_eq!(
        outcome,
        Some(CycleOutcome::PublishFailed {
            kind: ErrorKind::TransportDisconnected
        })
    );
    assert_eq!(transport.publish_count(), 0);

    scheduler.step().await;
    transport.set_state(ConnectionState::Connected);
    assert!(matches!(
        scheduler.step().await,
        Some(CycleOutcome::Published { .. })
    ));

    let stats = scheduler.stats().snapshot();
    assert_eq!(stats.publishes_failed, 1);
    assert_eq!(stats.publishes_acknowledged, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_drop_fails_blocked_publish() {
    let driver = Arc::new(MockSensorDriver::always(RawSample::new(20.0, 40.0)));
    let transport = Arc::new(MockTransport::with_ack_mode(AckMode::Manual));
    let mut scheduler = build(&driver, &transport, 15);

    let dropper = {
        let transport = transport.clone();
        tokio::spawn(async move {
            while transport.pending_acks() == 0 {
                tokio::task::yield_now().await;
            }
            transport.drop_connection("keep-alive timeout");
        })
    };

    let outcome = scheduler.step().await;
    dropper.await.unwrap();

    assert_eq!(
        outcome,
        Some(CycleOutcome::PublishFailed {
            kind: ErrorKind::TransportDisconnected
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_sleep() {
    let driver = Arc::new(MockSensorDriver::always(RawSample::new(20.0, 40.0)));
    let transport = Arc::new(MockTransport::new());
    let mut scheduler = build(&driver, &transport, 15);
    scheduler.step().await;
    assert_eq!(scheduler.state(), SchedulerState::Sleeping);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let start = Instant::now();
    let handle = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown_tx.send(true).unwrap();
    let stats = handle.await.unwrap();

    assert!(start.elapsed() < INTERVAL);
    assert_eq!(stats.cycles, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_blocked_publish() {
    let driver = Arc::new(MockSensorDriver::always(RawSample::new(20.0, 40.0)));
    let transport = Arc::new(MockTransport::with_ack_mode(AckMode::Manual));
    let scheduler = build(&driver, &transport, 15);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(scheduler.run(shutdown_rx));
    while transport.pending_acks() == 0 {
        tokio::task::yield_now().await;
    }
    shutdown_tx.send(true).unwrap();
    let stats = handle.await.unwrap();

    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.publishes_acknowledged, 0);
    assert_eq!(transport.publish_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_publish_order_follows_sample_order() {
    let driver = Arc::new(MockSensorDriver::with_fallback(
        vec![
            Ok(RawSample::new(20.0, 40.0)),
            Ok(RawSample::new(21.0, 41.0)),
            Ok(RawSample::new(22.0, 42.0)),
        ],
        Ok(RawSample::new(23.0, 43.0)),
    ));
    let transport = Arc::new(MockTransport::new());
    let mut scheduler = build(&driver, &transport, 15);

    for _ in 0..6 {
        scheduler.step().await;
    }

    let temperatures: Vec<f64> = transport
        .published()
        .iter()
        .map(|m| m.payload_json()["temperature"].as_f64().unwrap())
        .collect();
    assert_eq!(temperatures, vec![20.0, 21.0, 22.0]);

    let timestamps: Vec<String> = transport
        .published()
        .iter()
        .map(|m| m.payload_json()["timestamp"].as_str().unwrap().to_string())
        .collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted);
}
