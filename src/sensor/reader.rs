//! Retrying sensor reader
//!
//! DHT22 reads fail routinely (checksum mismatches, missed edges), so a
//! single poll is a bounded series of attempts with a fixed delay in
//! between. Exhausting the attempts yields [`Reading::Failed`], never an
//! error: the caller skips the cycle.

use super::{Reading, SensorDriver, SensorError};
use crate::config::SensorSection;
use chrono::{DateTime, SubsecRound, Utc};
use std::time::Duration;
use tracing::{debug, warn, Instrument, Span};

/// Bounded retry policy for low-level reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    /// 15 attempts, 2 seconds apart
    fn default() -> Self {
        Self {
            max_attempts: 15,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(section: &SensorSection) -> Self {
        Self::new(
            section.read_retries,
            Duration::from_secs(section.retry_delay_secs),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Worst-case time spent in one acquisition, excluding driver latency
    pub fn worst_case_delay(&self) -> Duration {
        self.delay * (self.max_attempts - 1)
    }
}

/// Sensor reader with an explicit retry policy
pub struct SensorReader<D> {
    driver: D,
    policy: RetryPolicy,
    span: Span,
}

impl<D: SensorDriver> SensorReader<D> {
    pub fn new(driver: D, policy: RetryPolicy, span: Span) -> Self {
        Self {
            driver,
            policy,
            span,
        }
    }

    /// Acquire one reading from the sensor on `pin`
    ///
    /// The capture time is taken before the first attempt, with microsecond
    /// precision.
    pub async fn acquire(&self, pin: u32) -> Reading {
        let captured_at = Utc::now().trunc_subsecs(6);
        self.acquire_at(pin, captured_at)
            .instrument(self.span.clone())
            .await
    }

    async fn acquire_at(&self, pin: u32, captured_at: DateTime<Utc>) -> Reading {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 0u32;

        let last_error: SensorError = loop {
            attempt += 1;
            match self.driver.read(pin).await.and_then(|s| s.validated()) {
                Ok(sample) => {
                    debug!(
                        pin,
                        attempt,
                        temperature = sample.temperature_celsius,
                        humidity = sample.humidity_percent,
                        "Sensor read succeeded"
                    );
                    return Reading::complete(captured_at, sample);
                }
                Err(e) if attempt >= max_attempts => break e,
                Err(e) => {
                    debug!(pin, attempt, max_attempts, error = %e, "Sensor read attempt failed");
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        };

        warn!(
            pin,
            attempts = attempt,
            error = %last_error,
            "Giving up on sensor read"
        );
        Reading::Failed {
            captured_at,
            attempts: attempt,
            last_error,
        }
    }
}
