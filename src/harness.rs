//! One bounded simulation session: connect, run devices, report.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::command::CommandKind;
use crate::config::SessionConfig;
use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::device::{Device, DeviceHandle, DeviceId};
use crate::dispatcher::{CommandDispatcher, command_feed};
use crate::error::{ConfigError, ConnectError, ScheduleError};
use crate::scheduler::{ScheduleReport, TelemetryScheduler};

/// Error messages kept per summary; the total is always counted.
pub(crate) const MAX_RETAINED_ERRORS: usize = 64;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Ran for the full duration.
    Completed,
    /// Stopped early by the caller (Ctrl+C in the CLI).
    Cancelled,
    /// The server closed or dropped the connection mid-session.
    ConnectionLost(String),
    /// Every connect attempt failed.
    ConnectFailed(ConnectError),
    ScheduleFailed(ScheduleError),
}

impl SessionOutcome {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionOutcome::ConnectionLost(_)
                | SessionOutcome::ConnectFailed(_)
                | SessionOutcome::ScheduleFailed(_)
        )
    }

    /// Remediation hint for fatal outcomes.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            SessionOutcome::ConnectFailed(err) => Some(err.hint()),
            SessionOutcome::ConnectionLost(_) => {
                Some("the server went away mid-session; check its logs and rerun")
            }
            SessionOutcome::ScheduleFailed(_) => {
                Some("check the DURATION and INTERVAL arguments and --devices")
            }
            SessionOutcome::Completed | SessionOutcome::Cancelled => None,
        }
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::Completed => write!(f, "completed"),
            SessionOutcome::Cancelled => write!(f, "cancelled"),
            SessionOutcome::ConnectionLost(reason) => write!(f, "connection lost ({reason})"),
            SessionOutcome::ConnectFailed(err) => write!(f, "connect failed ({err})"),
            SessionOutcome::ScheduleFailed(err) => write!(f, "scheduler failed ({err})"),
        }
    }
}

/// Final report of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub endpoint: String,
    pub outcome: SessionOutcome,
    pub devices: usize,
    pub ticks: u64,
    pub events_sent: u64,
    pub send_failures: u64,
    /// Commands received per kind.
    pub commands: BTreeMap<CommandKind, u64>,
    /// The first errors, up to a fixed cap.
    pub errors: Vec<String>,
    pub errors_total: u64,
    pub connect_attempts: u32,
    pub elapsed: Duration,
}

impl SessionSummary {
    fn new(config: &SessionConfig) -> Self {
        Self {
            endpoint: config.endpoint.to_string(),
            outcome: SessionOutcome::Completed,
            devices: 0,
            ticks: 0,
            events_sent: 0,
            send_failures: 0,
            commands: BTreeMap::new(),
            errors: Vec::new(),
            errors_total: 0,
            connect_attempts: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Process exit code: non-zero only for fatal outcomes.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.outcome.is_fatal())
    }

    #[must_use]
    pub fn commands_received(&self) -> u64 {
        self.commands.values().sum()
    }

    fn record_error(&mut self, message: String) {
        self.errors_total += 1;
        if self.errors.len() < MAX_RETAINED_ERRORS {
            self.errors.push(message);
        }
    }

    fn absorb(&mut self, report: ScheduleReport) {
        self.ticks = report.ticks;
        self.events_sent = report.events_sent;
        self.send_failures = report.send_failures;
        self.errors_total += report.send_failures - report.errors.len() as u64;
        for message in report.errors {
            self.record_error(message);
        }
    }
}

impl std::fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "session {} after {:.1}s against {}",
            self.outcome,
            self.elapsed.as_secs_f64(),
            self.endpoint
        )?;
        writeln!(
            f,
            "  devices: {}, ticks: {}, events sent: {}, send failures: {}",
            self.devices, self.ticks, self.events_sent, self.send_failures
        )?;
        write!(f, "  commands:")?;
        for kind in CommandKind::ALL {
            write!(f, " {}={}", kind, self.commands.get(&kind).copied().unwrap_or(0))?;
        }
        writeln!(f)?;
        write!(
            f,
            "  errors: {}, connect attempts: {}",
            self.errors_total, self.connect_attempts
        )
    }
}

enum Connected {
    Ready(ConnectionHandle),
    Failed(ConnectError),
    Cancelled,
}

/// Runs sessions for one validated [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct HarnessController {
    config: SessionConfig,
    manager: ConnectionManager,
}

impl HarnessController {
    /// # Errors
    ///
    /// The [`ConfigError`] from [`SessionConfig::validate`].
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let manager = ConnectionManager::new(config.connection.clone());
        Ok(Self { config, manager })
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one session to completion, cancellation or failure. Always
    /// attempts a graceful disconnect once connected.
    pub async fn run(&self, cancel: CancellationToken) -> SessionSummary {
        let started = Instant::now();
        let mut summary = SessionSummary::new(&self.config);

        let handle = match self.connect_with_retry(&cancel, &mut summary).await {
            Connected::Ready(handle) => handle,
            Connected::Failed(err) => {
                error!(endpoint = %summary.endpoint, error = %err, "giving up on connect");
                summary.outcome = SessionOutcome::ConnectFailed(err);
                summary.elapsed = started.elapsed();
                return summary;
            }
            Connected::Cancelled => {
                summary.outcome = SessionOutcome::Cancelled;
                summary.elapsed = started.elapsed();
                return summary;
            }
        };

        let session = cancel.child_token();
        let devices: Vec<DeviceHandle> = (0..self.config.devices)
            .map(|_| {
                DeviceHandle::new(
                    Device::new(DeviceId::random()),
                    self.config.park_delay,
                    &session,
                )
            })
            .collect();
        summary.devices = devices.len();
        for device in &devices {
            info!(device = %device.id(), "device online");
        }

        let dispatcher = CommandDispatcher::new(devices.clone());
        let serving = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let feed = command_feed(&handle);
            async move { dispatcher.serve(feed).await }
        });
        // Losing the server ends the session.
        let watcher = tokio::spawn({
            let handle = handle.clone();
            let session = session.clone();
            async move {
                if handle.closed().await.is_unexpected() {
                    session.cancel();
                }
            }
        });

        let mut scheduler = TelemetryScheduler::from_config(&self.config);
        let scheduled = scheduler.run(&devices, &handle, &session).await;

        // Not disconnected locally yet, so anything but Open means the server is gone.
        let lost = !handle.is_open();
        summary.outcome = match scheduled {
            Err(err) => SessionOutcome::ScheduleFailed(err),
            Ok(report) => {
                let cancelled = report.cancelled;
                summary.absorb(report);
                if lost {
                    let reason = handle.closed().await.to_string();
                    summary.record_error(reason.clone());
                    SessionOutcome::ConnectionLost(reason)
                } else if cancelled {
                    SessionOutcome::Cancelled
                } else {
                    SessionOutcome::Completed
                }
            }
        };

        session.cancel();
        for device in &devices {
            device.shutdown();
        }
        watcher.abort();
        serving.abort();

        let flush = self.config.flush_timeout;
        if timeout(flush, handle.disconnect()).await.is_err() {
            warn!(timeout = ?flush, "graceful disconnect did not finish in time");
        }

        let stats = dispatcher.stats();
        summary.commands = stats.received;
        summary.errors_total += stats.failures - stats.errors.len() as u64;
        for message in stats.errors {
            summary.record_error(message);
        }
        summary.elapsed = started.elapsed();

        if summary.outcome.is_fatal() {
            error!(outcome = %summary.outcome, "session failed");
        } else {
            info!(
                outcome = %summary.outcome,
                events = summary.events_sent,
                commands = summary.commands_received(),
                "session finished"
            );
        }
        summary
    }

    async fn connect_with_retry(
        &self,
        cancel: &CancellationToken,
        summary: &mut SessionSummary,
    ) -> Connected {
        let retry = &self.config.retry;
        let endpoint = &self.config.endpoint;
        let mut attempt = 0;

        loop {
            attempt += 1;
            summary.connect_attempts = attempt;
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Connected::Cancelled,
                result = self.manager.connect(endpoint) => result,
            };

            let err = match result {
                Ok(handle) => return Connected::Ready(handle),
                Err(err) => err,
            };
            summary.record_error(format!("connect attempt {attempt}: {err}"));
            if attempt >= retry.max_attempts {
                return Connected::Failed(err);
            }

            let delay = retry.backoff(attempt);
            warn!(%endpoint, attempt, retry_in = ?delay, error = %err, "connect failed");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Connected::Cancelled,
                () = sleep(delay) => {}
            }
        }
    }
}

/// Validate `config` and run one session.
///
/// # Errors
///
/// [`ConfigError`] if the configuration is invalid; every runtime failure is
/// reported through [`SessionSummary::outcome`] instead.
pub async fn run_session(
    config: SessionConfig,
    cancel: CancellationToken,
) -> Result<SessionSummary, ConfigError> {
    Ok(HarnessController::new(config)?.run(cancel).await)
}
