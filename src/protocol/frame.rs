//! WebSocket frame parsing and serialization (RFC 6455 section 5).

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: usize,
    /// Bytes occupied by the header, masking key included.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse the header at the front of `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if `buf` is too short to hold the header
    /// - `Error::ReservedBitsSet` if any RSV bit is set
    /// - opcode errors from [`OpCode::from_u8`]
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let (byte0, byte1) = (buf[0], buf[1]);
        if byte0 & 0x70 != 0 {
            return Err(Error::ReservedBitsSet);
        }
        let fin = byte0 & 0x80 != 0;
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = byte1 & 0x80 != 0;

        let (payload_len, len_end) = match byte1 & 0x7F {
            126 => {
                need(buf, 4)?;
                (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
            }
            127 => {
                need(buf, 10)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                let len = usize::try_from(len).map_err(|_| Error::FrameTooLarge {
                    size: usize::MAX,
                    max: usize::MAX,
                })?;
                (len, 10)
            }
            small => (small as usize, 2),
        };

        let mask = if masked {
            need(buf, len_end + 4)?;
            Some([
                buf[len_end],
                buf[len_end + 1],
                buf[len_end + 2],
                buf[len_end + 3],
            ])
        } else {
            None
        };

        Ok(Self {
            fin,
            opcode,
            mask,
            payload_len,
            header_len: if masked { len_end + 4 } else { len_end },
        })
    }
}

fn need(buf: &[u8], len: usize) -> Result<()> {
    if buf.len() < len {
        Err(Error::IncompleteFrame {
            needed: len - buf.len(),
        })
    } else {
        Ok(())
    }
}

/// A single WebSocket frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            opcode,
            payload,
        }
    }

    #[must_use]
    pub fn text(data: impl Into<String>) -> Self {
        Self::new(true, OpCode::Text, data.into().into_bytes())
    }

    /// Close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = code.to_be_bytes().to_vec();
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Parse one frame from the front of `buf`, returning it with the number of
    /// bytes consumed. Masked payloads are unmasked.
    ///
    /// # Errors
    ///
    /// `Error::IncompleteFrame` when more bytes are needed, plus the header
    /// errors of [`FrameHeader::parse`].
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total = header
            .header_len
            .checked_add(header.payload_len)
            .ok_or(Error::FrameTooLarge {
                size: header.payload_len,
                max: usize::MAX - header.header_len,
            })?;
        need(buf, total)?;

        let mut payload = buf[header.header_len..total].to_vec();
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        Ok((Self::new(header.fin, header.opcode, payload), total))
    }

    /// Check the control-frame rules.
    ///
    /// # Errors
    ///
    /// `Error::FragmentedControlFrame` or `Error::ControlFrameTooLarge`.
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Bytes needed to serialize this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let len = self.payload.len();
        let extended = match len {
            0..=125 => 0,
            126..=65535 => 2,
            _ => 8,
        };
        2 + extended + if masked { 4 } else { 0 } + len
    }

    /// Serialize into `buf`, masking the payload when `mask` is given.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// `Error::InvalidFrame` if `buf` is shorter than [`Frame::wire_size`].
    pub fn write(&self, buf: &mut [u8], mask: Option<[u8; 4]>) -> Result<usize> {
        let total = self.wire_size(mask.is_some());
        if buf.len() < total {
            return Err(Error::InvalidFrame(format!(
                "Buffer too small: need {} bytes, have {}",
                total,
                buf.len()
            )));
        }

        let len = self.payload.len();
        buf[0] = self.opcode.as_u8() | if self.fin { 0x80 } else { 0 };
        let mask_bit = if mask.is_some() { 0x80 } else { 0 };

        let mut offset = 2;
        match len {
            0..=125 => buf[1] = mask_bit | len as u8,
            126..=65535 => {
                buf[1] = mask_bit | 126;
                buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
                offset = 4;
            }
            _ => {
                buf[1] = mask_bit | 127;
                buf[2..10].copy_from_slice(&(len as u64).to_be_bytes());
                offset = 10;
            }
        }

        if let Some(key) = mask {
            buf[offset..offset + 4].copy_from_slice(&key);
            offset += 4;
        }

        let body = &mut buf[offset..offset + len];
        body.copy_from_slice(&self.payload);
        if let Some(key) = mask {
            apply_mask(body, key);
        }

        Ok(total)
    }
}
