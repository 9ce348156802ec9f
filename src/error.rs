//! Error types for the harness.
//!
//! `Error` covers the WebSocket wire layer. The remaining enums map to the
//! harness components: connecting, sending, dispatching commands, scheduling
//! ticks and validating configuration.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for wire-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while framing or parsing WebSocket traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text frame.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake headers exceeded the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set; no extensions are ever negotiated.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Text frame did not hold a well-formed event envelope.
    #[error("Invalid event envelope: {0}")]
    InvalidEnvelope(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

/// Failure to establish the event-channel connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectError {
    /// The endpoint actively refused the TCP connection.
    #[error("connection to {endpoint} refused")]
    Refused {
        /// Endpoint that refused.
        endpoint: String,
    },

    /// Connecting or upgrading did not finish in time.
    #[error("connection to {endpoint} timed out after {after:?}")]
    Timeout {
        /// Endpoint being contacted.
        endpoint: String,
        /// Time allowed for the attempt.
        after: Duration,
    },

    /// Name resolution or routing failed.
    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable {
        /// Endpoint being contacted.
        endpoint: String,
        /// Underlying cause.
        reason: String,
    },

    /// The server did not accept the WebSocket upgrade.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Any other I/O failure while connecting.
    #[error("I/O error while connecting: {0}")]
    Io(String),
}

impl ConnectError {
    /// Remediation hint shown next to the error message.
    pub fn hint(&self) -> &'static str {
        match self {
            ConnectError::Refused { .. } | ConnectError::Unreachable { .. } => {
                "ensure the messaging server is running and the endpoint address is correct"
            }
            ConnectError::Timeout { .. } => {
                "check network connectivity to the server or raise the connect timeout"
            }
            ConnectError::Handshake(_) => {
                "ensure the endpoint serves plain WebSocket upgrades on the given path"
            }
            ConnectError::Io(_) => "retry the session; if it persists check the host network",
        }
    }
}

impl From<Error> for ConnectError {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(reason) => ConnectError::Io(reason),
            other => ConnectError::Handshake(other.to_string()),
        }
    }
}

/// Failure to write an event after the connection was established.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SendError {
    /// The connection is closing, closed or was lost.
    #[error("not connected")]
    NotConnected,

    /// The write did not complete within the configured timeout.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// The payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(String),

    /// The transport rejected the write.
    #[error("transport error: {0}")]
    Transport(#[from] Error),
}

/// Failure to route an inbound command.
///
/// All variants are recoverable; the session logs them and keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchError {
    /// The command addressed a device that is not in the session.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The command name is not one of START, STOP, PARK, LOCK.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// The payload did not have the `{command, deviceId?}` shape.
    #[error("invalid command payload: {0}")]
    InvalidPayload(String),
}

/// Scheduler invariant violation. Fatal for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScheduleError {
    /// A zero interval would tick without bound.
    #[error("tick interval must be greater than zero")]
    ZeroInterval,

    /// There is nothing to drive.
    #[error("no devices to schedule")]
    NoDevices,

    /// The elapsed time cannot be represented as a wall-clock offset.
    #[error("elapsed time {0:?} overflows the wall clock")]
    ClockOverflow(Duration),
}

/// Invalid harness configuration. Fatal before the session starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The endpoint is not a parseable URL.
    #[error("invalid endpoint {input:?}: {reason}")]
    InvalidEndpoint {
        /// Raw input.
        input: String,
        /// Parser message.
        reason: String,
    },

    /// Only `ws://` and `http://` endpoints are supported.
    #[error("unsupported endpoint scheme {0:?}")]
    UnsupportedScheme(String),

    /// The tick interval is zero.
    #[error("interval must be at least 1 second")]
    ZeroInterval,

    /// The session has no devices.
    #[error("device count must be at least 1")]
    NoDevices,

    /// A named setting holds a value outside its domain.
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        /// Setting name.
        name: &'static str,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Usage hint shown next to the error message.
    pub fn usage_hint(&self) -> &'static str {
        match self {
            ConfigError::InvalidEndpoint { .. } | ConfigError::UnsupportedScheme(_) => {
                "pass --endpoint ws://HOST:PORT/PATH or set DEVSIM_ENDPOINT"
            }
            ConfigError::ZeroInterval => "usage: devsim [DURATION] [INTERVAL] with INTERVAL >= 1",
            ConfigError::NoDevices => "pass --devices N with N >= 1",
            ConfigError::InvalidValue { .. } => "run `devsim --help` for accepted values",
        }
    }
}

/// Failure of the ping probe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PingError {
    /// The ping event could not be sent.
    #[error("failed to send ping: {0}")]
    Send(#[from] SendError),

    /// No `pingResponse` arrived in time.
    #[error("no pingResponse within {0:?}")]
    Timeout(Duration),

    /// The connection went away while waiting.
    #[error("connection closed before pingResponse")]
    Closed,
}

/// Failure of a one-shot probe (`devsim ping`, `devsim send`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProbeError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Ping(#[from] PingError),

    #[error(transparent)]
    Send(#[from] SendError),
}

impl ProbeError {
    /// Remediation hint shown next to the error message.
    pub fn hint(&self) -> &'static str {
        match self {
            ProbeError::Connect(err) => err.hint(),
            ProbeError::Ping(PingError::Timeout(_)) => {
                "the server accepted the connection but does not answer ping events"
            }
            ProbeError::Ping(_) | ProbeError::Send(_) => {
                "the connection dropped; ensure the messaging server is running"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FrameTooLarge {
            size: 20_000_000,
            max: 16_000_000,
        };
        assert_eq!(
            err.to_string(),
            "Frame too large: 20000000 bytes (max: 16000000)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Io(_)));
    }

    #[test]
    fn test_connect_error_hint_mentions_server() {
        let err = ConnectError::Refused {
            endpoint: "ws://localhost:3000/".into(),
        };
        assert!(err.hint().contains("messaging server is running"));
        assert_eq!(err.to_string(), "connection to ws://localhost:3000/ refused");
    }

    #[test]
    fn test_connect_error_from_wire_error() {
        let err: ConnectError = Error::InvalidHandshake("bad accept".into()).into();
        assert!(matches!(err, ConnectError::Handshake(_)));

        let err: ConnectError = Error::Io("reset".into()).into();
        assert_eq!(err, ConnectError::Io("reset".into()));
    }

    #[test]
    fn test_send_error_wraps_transport() {
        let err: SendError = Error::ConnectionClosed(None).into();
        assert!(matches!(err, SendError::Transport(Error::ConnectionClosed(None))));
    }

    #[test]
    fn test_config_error_usage_hint() {
        assert!(ConfigError::ZeroInterval.usage_hint().contains("INTERVAL"));
        assert!(ConfigError::NoDevices.usage_hint().contains("--devices"));
    }
}
