//! One-shot connectivity diagnostics.

use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, timeout};
use tracing::{debug, info};

use crate::config::{Config, Endpoint};
use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::error::{PingError, ProbeError, SendError};

pub const PING: &str = "ping";
pub const PING_RESPONSE: &str = "pingResponse";
pub const TEST_MESSAGE: &str = "testMessage";

pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TEST_MESSAGE: &str = "testdeneme123";

#[derive(Serialize)]
struct TestMessage<'a> {
    message: &'a str,
}

/// Emit `ping` and wait for `pingResponse`. Returns the round-trip time.
///
/// # Errors
///
/// [`PingError::Send`] if the ping cannot be written, [`PingError::Timeout`]
/// if no response arrives in time, [`PingError::Closed`] if the connection
/// closes first.
pub async fn ping(handle: &ConnectionHandle, wait: Duration) -> Result<Duration, PingError> {
    // Register before sending so a fast response is not missed.
    let response = handle.once(PING_RESPONSE);
    let started = Instant::now();
    handle.emit(PING).await?;

    match timeout(wait, response).await {
        Ok(Ok(_)) => {
            let rtt = started.elapsed();
            debug!(?rtt, "pingResponse received");
            Ok(rtt)
        }
        Ok(Err(_)) => Err(PingError::Closed),
        Err(_) => Err(PingError::Timeout(wait)),
    }
}

/// Emit `testMessage` with `{ "message": message }`.
///
/// # Errors
///
/// Any [`SendError`] from the connection.
pub async fn send_test_message(handle: &ConnectionHandle, message: &str) -> Result<(), SendError> {
    handle.send(TEST_MESSAGE, &TestMessage { message }).await
}

/// Connect once, ping, disconnect.
///
/// # Errors
///
/// [`ProbeError::Connect`] or [`ProbeError::Ping`].
pub async fn run_ping(
    endpoint: &Endpoint,
    config: &Config,
    wait: Duration,
) -> Result<Duration, ProbeError> {
    let handle = ConnectionManager::new(config.clone()).connect(endpoint).await?;
    let result = ping(&handle, wait).await;
    handle.disconnect().await;
    let rtt = result?;
    info!(%endpoint, ?rtt, "ping ok");
    Ok(rtt)
}

/// Connect once, send a test message, disconnect.
///
/// # Errors
///
/// [`ProbeError::Connect`] or [`ProbeError::Send`].
pub async fn run_send(endpoint: &Endpoint, config: &Config, message: &str) -> Result<(), ProbeError> {
    let handle = ConnectionManager::new(config.clone()).connect(endpoint).await?;
    let result = send_test_message(&handle, message).await;
    handle.disconnect().await;
    result?;
    info!(%endpoint, message, "test message sent");
    Ok(())
}
