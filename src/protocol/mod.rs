//! Wire protocol: WebSocket framing and handshake plus the JSON event envelope.

pub mod envelope;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use envelope::Envelope;
pub use frame::{Frame, FrameHeader};
pub use handshake::{HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key};
pub use mask::apply_mask;
pub use opcode::OpCode;
