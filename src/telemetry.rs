//! Outbound `deviceData` snapshots.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::device::{CameraStatus, DeviceId, VehicleStatus};

/// Event name telemetry is emitted under.
pub const DEVICE_DATA: &str = "deviceData";

/// One device's state at one tick. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub gps_location: String,
    pub camera_status: CameraStatus,
    pub vehicle_status: VehicleStatus,
    pub engine_running: bool,
    pub auto_parking: bool,
    /// Local wall-clock time, `HH:MM:SS`.
    pub timestamp: String,
    pub device_id: DeviceId,
}

/// Render a wall-clock instant the way telemetry carries it.
#[must_use]
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format("%H:%M:%S").to_string()
}
