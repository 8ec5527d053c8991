//! Per-process operational counters
//!
//! Owned by the agent and shared by `Arc`; nothing here is global.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomic counters updated by the polling loop
#[derive(Debug)]
pub struct AgentStats {
    started: Instant,
    cycles: AtomicU64,
    readings_complete: AtomicU64,
    readings_failed: AtomicU64,
    publishes_acknowledged: AtomicU64,
    publishes_failed: AtomicU64,
    bytes_published: AtomicU64,
}

impl Default for AgentStats {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            cycles: AtomicU64::new(0),
            readings_complete: AtomicU64::new(0),
            readings_failed: AtomicU64::new(0),
            publishes_acknowledged: AtomicU64::new(0),
            publishes_failed: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
        }
    }

    pub fn cycle_started(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reading_complete(&self) {
        self.readings_complete.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reading_failed(&self) {
        self.readings_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_acknowledged(&self, bytes: usize) {
        self.publishes_acknowledged.fetch_add(1, Ordering::Relaxed);
        self.bytes_published
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publishes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            cycles: self.cycles.load(Ordering::Relaxed),
            readings_complete: self.readings_complete.load(Ordering::Relaxed),
            readings_failed: self.readings_failed.load(Ordering::Relaxed),
            publishes_acknowledged: self.publishes_acknowledged.load(Ordering::Relaxed),
            publishes_failed: self.publishes_failed.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub cycles: u64,
    pub readings_complete: u64,
    pub readings_failed: u64,
    pub publishes_acknowledged: u64,
    pub publishes_failed: u64,
    pub bytes_published: u64,
}

impl StatsSnapshot {
    /// Share of complete readings that were acknowledged by the broker
    pub fn delivery_rate(&self) -> f64 {
        if self.readings_complete == 0 {
            return 0.0;
        }
        self.publishes_acknowledged as f64 / self.readings_complete as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = AgentStats::new();
        stats.cycle_started();
        stats.reading_complete();
        stats.publish_acknowledged(104);
        stats.cycle_started();
        stats.reading_failed();
        stats.cycle_started();
        stats.reading_complete();
        stats.publish_failed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cycles, 3);
        assert_eq!(snapshot.readings_complete, 2);
        assert_eq!(snapshot.readings_failed, 1);
        assert_eq!(snapshot.publishes_acknowledged, 1);
        assert_eq!(snapshot.publishes_failed, 1);
        assert_eq!(snapshot.bytes_published, 104);
        assert_eq!(snapshot.delivery_rate(), 0.5);
    }

    #[test]
    fn test_delivery_rate_without_readings() {
        assert_eq!(StatsSnapshot::default().delivery_rate(), 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(AgentStats::new().snapshot()).unwrap();
        assert_eq!(json["cycles"], 0);
        assert_eq!(json["publishes_failed"], 0);
    }
}
