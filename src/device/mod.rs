//! Simulated vehicle devices.
//!
//! A [`Device`] is the pure state machine; a [`DeviceHandle`] wraps it in a
//! per-device async lock shared by telemetry ticks, commands and the
//! deferred auto-park completion.

mod handle;
mod machine;

pub use handle::DeviceHandle;
pub use machine::{Device, ParkTimer, Transition};

use serde::{Deserialize, Serialize};

/// Opaque device identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// A fresh random (UUID v4) identity.
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Simulated camera health. Independent of vehicle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraStatus {
    Active,
    Inactive,
    ConnectionError,
    LowBattery,
}

impl CameraStatus {
    pub const ALL: [CameraStatus; 4] = [
        CameraStatus::Active,
        CameraStatus::Inactive,
        CameraStatus::ConnectionError,
        CameraStatus::LowBattery,
    ];
}

/// Vehicle status reported in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleStatus {
    Running,
    Stopped,
    Parked,
    Moving,
    AutoParking,
}

impl VehicleStatus {
    /// Statuses a device in `state` may report.
    #[must_use]
    pub const fn candidates(state: DeviceState) -> &'static [VehicleStatus] {
        match state {
            DeviceState::Idle => &[VehicleStatus::Stopped, VehicleStatus::Parked],
            DeviceState::Running => &[VehicleStatus::Running, VehicleStatus::Moving],
            DeviceState::AutoParking => &[VehicleStatus::AutoParking],
        }
    }
}

/// Device state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceState {
    #[default]
    Idle,
    Running,
    AutoParking,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Idle => write!(f, "Idle"),
            DeviceState::Running => write!(f, "Running"),
            DeviceState::AutoParking => write!(f, "AutoParking"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_ids_are_unique() {
        let a = DeviceId::random();
        let b = DeviceId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&CameraStatus::ConnectionError).unwrap(),
            r#""ConnectionError""#
        );
        assert_eq!(
            serde_json::to_string(&VehicleStatus::AutoParking).unwrap(),
            r#""AutoParking""#
        );
        assert_eq!(serde_json::to_string(&DeviceId::from("d-1")).unwrap(), r#""d-1""#);
    }

    #[test]
    fn test_vehicle_status_candidates() {
        assert_eq!(
            VehicleStatus::candidates(DeviceState::AutoParking),
            &[VehicleStatus::AutoParking]
        );
        assert!(!VehicleStatus::candidates(DeviceState::Idle).contains(&VehicleStatus::Running));
        assert!(!VehicleStatus::candidates(DeviceState::Running).contains(&VehicleStatus::Parked));
    }
}
