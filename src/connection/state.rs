//! Lifecycle of the event-channel connection.

use crate::message::CloseFrame;

/// Connection state as observed through a
/// [`ConnectionHandle`](crate::connection::ConnectionHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// TCP connect or upgrade handshake in progress.
    #[default]
    Connecting,
    /// Events may be sent and are being received.
    Open,
    /// Close frame sent, tearing down.
    Closing,
    Closed,
}

impl ConnectionState {
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Only an open connection accepts outbound events.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Why a connection reached [`ConnectionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called locally.
    Requested,
    /// The server sent a close frame.
    Remote(Option<CloseFrame>),
    /// The transport failed or the server vanished without a close frame.
    Error(String),
}

impl DisconnectReason {
    /// Whether the session should treat this as losing the server.
    #[must_use]
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, DisconnectReason::Requested)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "disconnect requested"),
            DisconnectReason::Remote(Some(close)) if close.reason.is_empty() => {
                write!(f, "server closed the connection ({})", close.code.as_u16())
            }
            DisconnectReason::Remote(Some(close)) => write!(
                f,
                "server closed the connection ({}: {})",
                close.code.as_u16(),
                close.reason
            ),
            DisconnectReason::Remote(None) => write!(f, "server closed the connection"),
            DisconnectReason::Error(reason) => write!(f, "connection lost: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CloseCode;

    #[test]
    fn test_initial_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Connecting);
    }

    #[test]
    fn test_only_open_can_send() {
        assert!(ConnectionState::Open.can_send());
        assert!(!ConnectionState::Connecting.can_send());
        assert!(!ConnectionState::Closing.can_send());
        assert!(!ConnectionState::Closed.can_send());
        assert!(ConnectionState::Closing.is_active());
        assert!(!ConnectionState::Closed.is_active());
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::Requested.to_string(), "disconnect requested");
        assert_eq!(
            DisconnectReason::Remote(Some(CloseFrame::new(CloseCode::GoingAway, "restart")))
                .to_string(),
            "server closed the connection (1001: restart)"
        );
        assert!(DisconnectReason::Error("reset".into()).is_unexpected());
        assert!(!DisconnectReason::Requested.is_unexpected());
    }
}
