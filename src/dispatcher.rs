//! Routes inbound `deviceCommand` events to devices.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::command::{Command, CommandKind, DEVICE_COMMAND};
use crate::connection::ConnectionHandle;
use crate::device::{DeviceHandle, DeviceId, Transition};
use crate::error::DispatchError;
use crate::harness::MAX_RETAINED_ERRORS;

/// Counters kept by a [`CommandDispatcher`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Decoded commands per kind, including ones for unknown devices.
    pub received: BTreeMap<CommandKind, u64>,
    pub failures: u64,
    pub errors: Vec<String>,
}

/// Applies commands to the session's devices.
///
/// A command is applied under the target device's lock; a broadcast command
/// is applied to all devices concurrently.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    devices: Arc<HashMap<DeviceId, DeviceHandle>>,
    stats: Arc<parking_lot::Mutex<DispatchStats>>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(devices: impl IntoIterator<Item = DeviceHandle>) -> Self {
        let devices = devices
            .into_iter()
            .map(|device| (device.id().clone(), device))
            .collect();
        Self {
            devices: Arc::new(devices),
            stats: Arc::default(),
        }
    }

    /// Apply `command`, returning one transition per addressed device.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownDevice`] if the target is not in the session.
    pub async fn dispatch(&self, command: &Command) -> Result<Vec<Transition>, DispatchError> {
        match &command.target {
            Some(id) => {
                let device = self
                    .devices
                    .get(id)
                    .ok_or_else(|| DispatchError::UnknownDevice(id.to_string()))?;
                Ok(vec![device.apply(command.kind).await])
            }
            None => Ok(join_all(self.devices.values().map(|device| device.apply(command.kind))).await),
        }
    }

    /// Decode and apply one raw payload, recording the outcome. Never fails;
    /// errors are counted and logged.
    pub async fn handle(&self, payload: &Value) {
        let result = match Command::from_payload(payload) {
            Ok(command) => {
                *self.stats.lock().received.entry(command.kind).or_insert(0) += 1;
                info!(command = %command.kind, target = ?command.target, "command received");
                self.dispatch(&command).await.map(|_| ())
            }
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            warn!(error = %err, %payload, "command ignored");
            let mut stats = self.stats.lock();
            stats.failures += 1;
            if stats.errors.len() < MAX_RETAINED_ERRORS {
                stats.errors.push(err.to_string());
            }
        }
    }

    /// Apply payloads in arrival order until the sender side is dropped.
    pub async fn serve(&self, mut commands: mpsc::UnboundedReceiver<Value>) {
        while let Some(payload) = commands.recv().await {
            self.handle(&payload).await;
        }
    }

    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().clone()
    }
}

/// Forward every inbound `deviceCommand` payload on `handle` to a channel.
///
/// The subscription callback runs on the connection's reader task, so it only
/// enqueues; [`CommandDispatcher::serve`] does the work.
pub fn command_feed(handle: &ConnectionHandle) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    handle.subscribe(DEVICE_COMMAND, move |payload| {
        let _ = tx.send(payload.clone());
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceState};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn setup(ids: &[&str]) -> (CommandDispatcher, Vec<DeviceHandle>) {
        let session = CancellationToken::new();
        let devices: Vec<DeviceHandle> = ids
            .iter()
            .map(|id| {
                DeviceHandle::new(Device::new(DeviceId::from(*id)), Duration::from_secs(5), &session)
            })
            .collect();
        (CommandDispatcher::new(devices.clone()), devices)
    }

    #[tokio::test]
    async fn test_targeted_command() {
        let (dispatcher, devices) = setup(&["a", "b"]);
        let transitions = dispatcher
            .dispatch(&Command::to(CommandKind::Start, DeviceId::from("b")))
            .await
            .unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(devices[0].current().await.state(), DeviceState::Idle);
        assert_eq!(devices[1].current().await.state(), DeviceState::Running);
    }

    #[tokio::test]
    async fn test_broadcast_command() {
        let (dispatcher, devices) = setup(&["a", "b", "c"]);
        let transitions = dispatcher
            .dispatch(&Command::broadcast(CommandKind::Start))
            .await
            .unwrap();
        assert_eq!(transitions.len(), 3);
        for device in &devices {
            assert!(device.current().await.engine_running());
        }
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let (dispatcher, _devices) = setup(&["a"]);
        assert_eq!(
            dispatcher
                .dispatch(&Command::to(CommandKind::Stop, DeviceId::from("zzz")))
                .await,
            Err(DispatchError::UnknownDevice("zzz".into()))
        );
    }

    #[tokio::test]
    async fn test_serve_counts_and_survives_errors() {
        let (dispatcher, devices) = setup(&["a"]);
        let (tx, rx) = mpsc::unbounded_channel();
        for payload in [
            json!({"command": "START"}),
            json!({"command": "LOCK"}),
            json!({"command": "FLY"}),
            json!({"nope": true}),
            json!({"command": "PARK", "deviceId": "ghost"}),
            json!({"command": "PARK"}),
        ] {
            tx.send(payload).unwrap();
        }
        drop(tx);
        dispatcher.serve(rx).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.received.get(&CommandKind::Start), Some(&1));
        assert_eq!(stats.received.get(&CommandKind::Lock), Some(&1));
        assert_eq!(stats.received.get(&CommandKind::Park), Some(&2));
        assert_eq!(stats.failures, 3);
        assert_eq!(stats.errors.len(), 3);

        let device = devices[0].current().await;
        assert_eq!(device.state(), DeviceState::AutoParking);
        assert_eq!(device.locks(), 1);
    }
}
