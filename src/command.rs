//! Inbound `deviceCommand` events.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::DeviceId;
use crate::error::DispatchError;

/// Event name commands arrive under.
pub const DEVICE_COMMAND: &str = "deviceCommand";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandKind {
    Start,
    Stop,
    Park,
    Lock,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Start,
        CommandKind::Stop,
        CommandKind::Park,
        CommandKind::Lock,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Start => "START",
            CommandKind::Stop => "STOP",
            CommandKind::Park => "PARK",
            CommandKind::Lock => "LOCK",
        }
    }
}

impl FromStr for CommandKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DispatchError::UnknownCommand(s.to_string()))
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded command. `target: None` addresses every device in the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub target: Option<DeviceId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommand {
    command: String,
    #[serde(default)]
    device_id: Option<String>,
}

impl Command {
    #[must_use]
    pub fn broadcast(kind: CommandKind) -> Self {
        Self { kind, target: None }
    }

    #[must_use]
    pub fn to(kind: CommandKind, device: DeviceId) -> Self {
        Self {
            kind,
            target: Some(device),
        }
    }

    /// Decode a `{command, deviceId?}` payload.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidPayload`] for the wrong shape and
    /// [`DispatchError::UnknownCommand`] for an unrecognised command name.
    pub fn from_payload(payload: &Value) -> Result<Self, DispatchError> {
        let raw: RawCommand = serde_json::from_value(payload.clone())
            .map_err(|err| DispatchError::InvalidPayload(err.to_string()))?;
        Ok(Self {
            kind: raw.command.parse()?,
            target: raw.device_id.map(DeviceId::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_kinds() {
        for kind in CommandKind::ALL {
            assert_eq!(kind.as_str().parse::<CommandKind>(), Ok(kind));
        }
        assert_eq!(
            "start".parse::<CommandKind>(),
            Err(DispatchError::UnknownCommand("start".into()))
        );
    }

    #[test]
    fn test_from_payload() {
        assert_eq!(
            Command::from_payload(&json!({"command": "PARK"})),
            Ok(Command::broadcast(CommandKind::Park))
        );
        assert_eq!(
            Command::from_payload(&json!({"command": "STOP", "deviceId": "dev-2"})),
            Ok(Command::to(CommandKind::Stop, DeviceId::from("dev-2")))
        );
    }

    #[test]
    fn test_from_payload_errors() {
        assert!(matches!(
            Command::from_payload(&json!({"cmd": "PARK"})),
            Err(DispatchError::InvalidPayload(_))
        ));
        assert!(matches!(
            Command::from_payload(&Value::Null),
            Err(DispatchError::InvalidPayload(_))
        ));
        assert_eq!(
            Command::from_payload(&json!({"command": "FLY"})),
            Err(DispatchError::UnknownCommand("FLY".into()))
        );
    }
}
