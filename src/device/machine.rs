//! Pure device state machine. No I/O, no timers.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::command::CommandKind;
use crate::config::SignalSet;
use crate::device::{CameraStatus, DeviceId, DeviceState, VehicleStatus};
use crate::telemetry::TelemetryEvent;

/// What the caller must do with the auto-park timer after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkTimer {
    Keep,
    /// Start a completion timer tagged with this epoch.
    Schedule(u64),
    /// Abort the pending completion.
    Cancel,
}

/// Result of applying one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub command: CommandKind,
    pub from: DeviceState,
    pub to: DeviceState,
    pub park: ParkTimer,
}

impl Transition {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// One simulated vehicle.
///
/// `autoParking` is derived from the state, so it can never disagree with a
/// reported `AutoParking` vehicle status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    id: DeviceId,
    state: DeviceState,
    engine_running: bool,
    /// Bumped by every Park that schedules and every Stop; a completion only
    /// lands if its epoch is still current.
    park_epoch: u64,
    park_completions: u64,
    locks: u64,
}

impl Device {
    #[must_use]
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            state: DeviceState::Idle,
            engine_running: false,
            park_epoch: 0,
            park_completions: 0,
            locks: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    #[must_use]
    pub fn engine_running(&self) -> bool {
        self.engine_running
    }

    #[must_use]
    pub fn auto_parking(&self) -> bool {
        self.state == DeviceState::AutoParking
    }

    #[must_use]
    pub fn park_completions(&self) -> u64 {
        self.park_completions
    }

    #[must_use]
    pub fn locks(&self) -> u64 {
        self.locks
    }

    pub fn apply(&mut self, command: CommandKind) -> Transition {
        let from = self.state;
        let park = match command {
            // An in-flight auto-park is not interrupted by Start.
            CommandKind::Start if self.auto_parking() => ParkTimer::Keep,
            CommandKind::Start => {
                self.state = DeviceState::Running;
                self.engine_running = true;
                ParkTimer::Keep
            }
            CommandKind::Stop => {
                self.park_epoch += 1;
                self.state = DeviceState::Idle;
                self.engine_running = false;
                if from == DeviceState::AutoParking {
                    ParkTimer::Cancel
                } else {
                    ParkTimer::Keep
                }
            }
            CommandKind::Park if self.auto_parking() => ParkTimer::Keep,
            CommandKind::Park => {
                self.park_epoch += 1;
                self.state = DeviceState::AutoParking;
                ParkTimer::Schedule(self.park_epoch)
            }
            CommandKind::Lock => {
                self.locks += 1;
                ParkTimer::Keep
            }
        };

        Transition {
            command,
            from,
            to: self.state,
            park,
        }
    }

    /// Finish the auto-park scheduled under `epoch`. Returns `false` if it
    /// was superseded or cancelled in the meantime.
    pub fn complete_park(&mut self, epoch: u64) -> bool {
        if !self.auto_parking() || epoch != self.park_epoch {
            return false;
        }
        self.state = DeviceState::Idle;
        self.engine_running = false;
        self.park_completions += 1;
        true
    }

    /// Produce this tick's telemetry. Location and camera status are drawn
    /// uniformly from `signals`, vehicle status from the current state.
    pub fn snapshot<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        signals: &SignalSet,
        timestamp: String,
    ) -> TelemetryEvent {
        let vehicle_status = VehicleStatus::candidates(self.state)
            .choose(rng)
            .copied()
            .unwrap_or(VehicleStatus::Stopped);
        let gps_location = signals
            .gps_locations
            .choose(rng)
            .cloned()
            .unwrap_or_default();
        let camera_status = signals
            .camera_statuses
            .choose(rng)
            .copied()
            .unwrap_or(CameraStatus::Active);

        TelemetryEvent {
            gps_location,
            camera_status,
            vehicle_status,
            engine_running: self.engine_running,
            auto_parking: self.auto_parking(),
            timestamp,
            device_id: self.id.clone(),
        }
    }
}
