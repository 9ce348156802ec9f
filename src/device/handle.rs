//! Shared, lock-guarded device with its cancellable auto-park timer.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::CommandKind;
use crate::config::SignalSet;
use crate::device::{Device, DeviceId, ParkTimer, Transition};
use crate::telemetry::TelemetryEvent;

/// Cloneable handle to one simulated device.
///
/// Every access goes through one `tokio::sync::Mutex`, so a command, a tick
/// snapshot and an auto-park completion never interleave.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<Inner>,
}

struct Inner {
    id: DeviceId,
    device: tokio::sync::Mutex<Device>,
    park_timer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    park_delay: Duration,
    cancel: CancellationToken,
}

impl DeviceHandle {
    /// Wrap `device`. Its park timers stop when `session` is cancelled.
    #[must_use]
    pub fn new(device: Device, park_delay: Duration, session: &CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: device.id().clone(),
                device: tokio::sync::Mutex::new(device),
                park_timer: parking_lot::Mutex::new(None),
                park_delay,
                cancel: session.child_token(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.inner.id
    }

    /// Apply a command under the device lock and arm or abort the park timer.
    pub async fn apply(&self, command: CommandKind) -> Transition {
        let mut device = self.inner.device.lock().await;
        let transition = device.apply(command);
        match transition.park {
            ParkTimer::Schedule(epoch) => self.arm_park_timer(epoch),
            ParkTimer::Cancel => self.abort_park_timer(),
            ParkTimer::Keep => {}
        }
        drop(device);

        if transition.changed() {
            info!(device = %self.inner.id, %command, from = %transition.from, to = %transition.to, "state changed");
        } else {
            debug!(device = %self.inner.id, %command, state = %transition.to, "command applied without state change");
        }
        transition
    }

    /// Telemetry for one tick, taken under the device lock.
    pub async fn snapshot<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        signals: &SignalSet,
        timestamp: String,
    ) -> TelemetryEvent {
        self.inner
            .device
            .lock()
            .await
            .snapshot(rng, signals, timestamp)
    }

    /// Copy of the current device state.
    pub async fn current(&self) -> Device {
        self.inner.device.lock().await.clone()
    }

    /// Stop any pending auto-park. Safe to call more than once.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.abort_park_timer();
    }

    fn arm_park_timer(&self, epoch: u64) {
        let inner = self.inner.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                () = inner.cancel.cancelled() => return,
                () = tokio::time::sleep(inner.park_delay) => {}
            }
            let mut device = inner.device.lock().await;
            if inner.cancel.is_cancelled() {
                return;
            }
            if device.complete_park(epoch) {
                info!(device = %inner.id, "auto-park complete");
            }
        });
        if let Some(previous) = self.inner.park_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    fn abort_park_timer(&self) {
        if let Some(timer) = self.inner.park_timer.lock().take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.inner.id)
            .field("park_delay", &self.inner.park_delay)
            .finish_non_exhaustive()
    }
}
