//! Frame-level reading and writing over tokio async I/O.

mod framed;

pub use framed::{FrameReader, FrameWriter, read_http_head};
