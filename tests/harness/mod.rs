//! Shared fixtures for integration tests.
//!
//! [`TestServer`] is an in-process stand-in for the messaging server, built on
//! the crate's own server-side handshake and framing.

mod server;

#[allow(unused_imports)]
pub use server::{ServerOptions, TestServer};
