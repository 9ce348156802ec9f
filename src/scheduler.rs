//! Fixed-cadence telemetry loop driving every device.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use futures::future::join_all;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, SignalSet};
use crate::connection::ConnectionHandle;
use crate::device::DeviceHandle;
use crate::error::{ScheduleError, SendError};
use crate::harness::MAX_RETAINED_ERRORS;
use crate::telemetry::{DEVICE_DATA, TelemetryEvent, format_timestamp};

/// Where telemetry goes.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, event: &TelemetryEvent) -> Result<(), SendError>;
}

#[async_trait]
impl TelemetrySink for ConnectionHandle {
    async fn publish(&self, event: &TelemetryEvent) -> Result<(), SendError> {
        self.send(DEVICE_DATA, event).await
    }
}

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub ticks: u64,
    pub events_sent: u64,
    pub send_failures: u64,
    /// The first failures, capped.
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl ScheduleReport {
    fn record_failure(&mut self, message: String) {
        self.send_failures += 1;
        if self.errors.len() < MAX_RETAINED_ERRORS {
            self.errors.push(message);
        }
    }
}

/// Emits one [`TelemetryEvent`] per device per interval.
///
/// Tick `k` fires at `start + k * interval` for every `k` with
/// `k * interval < duration`. Ticks are anchored to the start instant, so
/// slow sends never accumulate drift; a tick that is missed entirely is
/// skipped rather than bunched.
#[derive(Debug)]
pub struct TelemetryScheduler {
    interval: Duration,
    duration: Duration,
    signals: SignalSet,
    rng: StdRng,
}

impl TelemetryScheduler {
    /// `seed: None` draws signal values from OS entropy.
    #[must_use]
    pub fn new(interval: Duration, duration: Duration, signals: SignalSet, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            interval,
            duration,
            signals,
            rng,
        }
    }

    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.interval,
            config.duration,
            config.signals.clone(),
            config.seed,
        )
    }

    /// Ticks a full, uncancelled run produces.
    #[must_use]
    pub fn expected_ticks(&self) -> u64 {
        if self.interval.is_zero() {
            return 0;
        }
        let whole = self.duration.as_nanos() / self.interval.as_nanos();
        let partial = self.duration.as_nanos() % self.interval.as_nanos() != 0;
        (whole + u128::from(partial)) as u64
    }

    /// Run until `duration` has elapsed or `cancel` fires.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::ZeroInterval`], [`ScheduleError::NoDevices`] up
    /// front, [`ScheduleError::ClockOverflow`] if a timestamp cannot be
    /// computed. Send failures are counted, not returned.
    pub async fn run<S>(
        &mut self,
        devices: &[DeviceHandle],
        sink: &S,
        cancel: &CancellationToken,
    ) -> Result<ScheduleReport, ScheduleError>
    where
        S: TelemetrySink + ?Sized,
    {
        if self.interval.is_zero() {
            return Err(ScheduleError::ZeroInterval);
        }
        if devices.is_empty() {
            return Err(ScheduleError::NoDevices);
        }

        let start = Instant::now();
        let wall_start = Local::now();
        let mut ticker = interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report = ScheduleReport::default();

        info!(
            devices = devices.len(),
            interval = ?self.interval,
            duration = ?self.duration,
            "telemetry started"
        );

        loop {
            let tick_at = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                at = ticker.tick() => at,
            };
            let elapsed = tick_at.saturating_duration_since(start);
            if elapsed >= self.duration {
                break;
            }

            let offset = chrono::Duration::from_std(elapsed)
                .map_err(|_| ScheduleError::ClockOverflow(elapsed))?;
            let at = wall_start
                .checked_add_signed(offset)
                .ok_or(ScheduleError::ClockOverflow(elapsed))?;
            let timestamp = format_timestamp(at);

            let mut events = Vec::with_capacity(devices.len());
            for device in devices {
                events.push(
                    device
                        .snapshot(&mut self.rng, &self.signals, timestamp.clone())
                        .await,
                );
            }
            let results = join_all(events.iter().map(|event| sink.publish(event))).await;

            report.ticks += 1;
            for (event, result) in events.iter().zip(results) {
                match result {
                    Ok(()) => {
                        report.events_sent += 1;
                        debug!(
                            device = %event.device_id,
                            vehicle = ?event.vehicle_status,
                            timestamp = %event.timestamp,
                            "telemetry sent"
                        );
                    }
                    Err(err) => {
                        warn!(device = %event.device_id, error = %err, "telemetry send failed");
                        report.record_failure(format!("{}: {err}", event.device_id));
                    }
                }
            }
        }

        info!(
            ticks = report.ticks,
            sent = report.events_sent,
            failed = report.send_failures,
            cancelled = report.cancelled,
            "telemetry stopped"
        );
        Ok(report)
    }
}
