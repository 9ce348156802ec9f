//! Reassembled WebSocket messages and close codes.

use crate::error::{Error, Result};
use crate::protocol::{Frame, OpCode};

/// Close status code (RFC 6455 section 7.4). Only the codes the harness
/// sends or reacts to get their own variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloseCode {
    /// 1000: session finished.
    #[default]
    Normal,
    /// 1001: endpoint shutting down.
    GoingAway,
    /// 1002: peer broke the framing rules.
    ProtocolError,
    Other(u16),
}

impl CloseCode {
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            other => CloseCode::Other(other),
        }
    }

    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Other(code) => *code,
        }
    }
}

/// Status code and reason of a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseFrame {
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Decode a close payload. An empty payload carries no status.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            [] => None,
            [hi, lo, reason @ ..] => Some(match std::str::from_utf8(reason) {
                Ok(reason) => Self::new(CloseCode::from_u16(u16::from_be_bytes([*hi, *lo])), reason),
                Err(_) => Self::new(CloseCode::ProtocolError, "invalid close reason"),
            }),
            [_] => Some(Self::new(CloseCode::ProtocolError, "truncated close frame")),
        }
    }
}

/// A complete message as delivered by [`FrameReader::read_message`](crate::codec::FrameReader::read_message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

impl Message {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Build a message from a complete data payload or a control frame.
    ///
    /// # Errors
    ///
    /// `Error::InvalidUtf8` for text that is not UTF-8, and
    /// `Error::ProtocolViolation` for a stray continuation opcode.
    pub fn from_parts(opcode: OpCode, payload: Vec<u8>) -> Result<Self> {
        match opcode {
            OpCode::Text => String::from_utf8(payload)
                .map(Message::Text)
                .map_err(|_| Error::InvalidUtf8),
            OpCode::Binary => Ok(Message::Binary(payload)),
            OpCode::Ping => Ok(Message::Ping(payload)),
            OpCode::Pong => Ok(Message::Pong(payload)),
            OpCode::Close => Ok(Message::Close(CloseFrame::from_payload(&payload))),
            OpCode::Continuation => Err(Error::ProtocolViolation(
                "continuation frame without a message in progress".into(),
            )),
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::new(true, OpCode::Binary, data),
            Message::Ping(data) => Frame::ping(data),
            Message::Pong(data) => Frame::pong(data),
            Message::Close(Some(close)) => Frame::close(Some(close.code.as_u16()), &close.reason),
            Message::Close(None) => Frame::close(None, ""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_roundtrip() {
        for code in [1000, 1001, 1002, 4000] {
            assert_eq!(CloseCode::from_u16(code).as_u16(), code);
        }
        assert_eq!(CloseCode::from_u16(4000), CloseCode::Other(4000));
    }

    #[test]
    fn test_close_frame_from_payload() {
        assert_eq!(CloseFrame::from_payload(&[]), None);
        assert_eq!(
            CloseFrame::from_payload(&[0x03, 0xe8, b'o', b'k']),
            Some(CloseFrame::new(CloseCode::Normal, "ok"))
        );
        assert_eq!(
            CloseFrame::from_payload(&[0x03]).map(|c| c.code),
            Some(CloseCode::ProtocolError)
        );
    }

    #[test]
    fn test_from_parts_text_must_be_utf8() {
        assert_eq!(
            Message::from_parts(OpCode::Text, b"hi".to_vec()),
            Ok(Message::text("hi"))
        );
        assert_eq!(
            Message::from_parts(OpCode::Text, vec![0xff, 0xfe]),
            Err(Error::InvalidUtf8)
        );
    }

    #[test]
    fn test_message_into_frame() {
        let frame = Frame::from(Message::Close(Some(CloseFrame::new(CloseCode::GoingAway, ""))));
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(frame.payload(), &[0x03, 0xe9]);
    }
}
