use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{Config, Limits};
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::{Frame, FrameHeader, OpCode};

/// Seed for mask generation, falling back to the clock if the OS source fails.
fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x1234_5678)
    }
}

/// Read an HTTP head (up to and including the blank line).
///
/// Returns the head and any bytes that arrived after it; those belong to the
/// first WebSocket frame and must be handed to [`FrameReader::with_buffered`].
///
/// # Errors
///
/// `Error::HandshakeTooLarge` past `max` bytes, `Error::ConnectionClosed` on
/// EOF, `Error::Io` on read failure.
pub async fn read_http_head<R: AsyncRead + Unpin>(
    io: &mut R,
    max: usize,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = buf.split_off(pos + 4);
            return Ok((buf, rest));
        }
        if buf.len() > max {
            return Err(Error::HandshakeTooLarge {
                size: buf.len(),
                max,
            });
        }
        let n = io.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed(None));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Read half of a WebSocket stream.
///
/// Validates masking against the local [`Role`], enforces [`Limits`] and
/// reassembles fragmented data messages.
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    role: Role,
    limits: Limits,
    partial: Option<(OpCode, Vec<u8>)>,
}

impl<R> FrameReader<R> {
    #[must_use]
    pub fn new(io: R, role: Role, config: &Config) -> Self {
        Self::with_buffered(io, role, config, &[])
    }

    /// Start with bytes already read past the handshake.
    #[must_use]
    pub fn with_buffered(io: R, role: Role, config: &Config, buffered: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(buffered.len().max(config.read_buffer_size));
        buf.extend_from_slice(buffered);
        Self {
            io,
            buf,
            role,
            limits: config.limits.clone(),
            partial: None,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read one raw frame.
    ///
    /// # Errors
    ///
    /// Framing and limit errors, `Error::ConnectionClosed` on clean EOF.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match FrameHeader::parse(&self.buf) {
                Ok(header) => {
                    match (self.role.expects_masked(), header.mask.is_some()) {
                        (true, false) => return Err(Error::UnmaskedClientFrame),
                        (false, true) => return Err(Error::MaskedServerFrame),
                        _ => {}
                    }
                    self.limits.check_frame_size(header.payload_len)?;

                    match Frame::parse(&self.buf) {
                        Ok((frame, consumed)) => {
                            self.buf.advance(consumed);
                            frame.validate()?;
                            return Ok(frame);
                        }
                        Err(Error::IncompleteFrame { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(Error::IncompleteFrame { .. }) => {}
                Err(e) => return Err(e),
            }

            self.buf.reserve(4096);
            let n = self.io.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }

    /// Read the next complete message. Control frames interleaved with a
    /// fragmented message are returned as they arrive.
    ///
    /// # Errors
    ///
    /// Errors of [`read_frame`](Self::read_frame), plus
    /// `Error::ProtocolViolation` for out-of-order fragments and
    /// `Error::MessageTooLarge` for oversize reassembly.
    pub async fn read_message(&mut self) -> Result<Message> {
        loop {
            let frame = self.read_frame().await?;
            let fin = frame.fin;
            let opcode = frame.opcode;

            if opcode.is_control() {
                return Message::from_parts(opcode, frame.into_payload());
            }

            match (opcode, self.partial.take()) {
                (OpCode::Continuation, Some((first, mut data))) => {
                    data.extend_from_slice(frame.payload());
                    self.limits.check_message_size(data.len())?;
                    if fin {
                        return Message::from_parts(first, data);
                    }
                    self.partial = Some((first, data));
                }
                (OpCode::Continuation, None) => {
                    return Err(Error::ProtocolViolation(
                        "continuation frame without a message in progress".into(),
                    ));
                }
                (_, Some(_)) => {
                    return Err(Error::ProtocolViolation(
                        "new data frame before previous message finished".into(),
                    ));
                }
                (first, None) if fin => return Message::from_parts(first, frame.into_payload()),
                (first, None) => self.partial = Some((first, frame.into_payload())),
            }
        }
    }
}

/// Write half of a WebSocket stream. Clients mask every frame.
pub struct FrameWriter<W> {
    io: W,
    buf: Vec<u8>,
    role: Role,
    mask_counter: u32,
}

impl<W> FrameWriter<W> {
    #[must_use]
    pub fn new(io: W, role: Role) -> Self {
        Self {
            io,
            buf: Vec::with_capacity(1024),
            role,
            mask_counter: random_mask_seed(),
        }
    }

    fn generate_mask(&mut self) -> [u8; 4] {
        self.mask_counter = self.mask_counter.wrapping_add(0x9E37_79B9);
        let a = self.mask_counter.wrapping_mul(0x85EB_CA6B);
        let b = a ^ (a >> 13);
        b.wrapping_mul(0xC2B2_AE35).to_le_bytes()
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.io
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// # Errors
    ///
    /// `Error::Io` if the underlying write fails.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mask = self.role.must_mask().then(|| self.generate_mask());
        self.buf.clear();
        self.buf.resize(frame.wire_size(mask.is_some()), 0);
        let written = frame.write(&mut self.buf, mask)?;
        self.io.write_all(&self.buf[..written]).await?;
        Ok(())
    }

    /// Write and flush a whole message as one frame.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the write or flush fails.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        self.write_frame(&Frame::from(message)).await?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
