//! # devsim - device simulation and event-messaging test harness
//!
//! `devsim` simulates stateful IoT vehicles that stream telemetry to a
//! real-time messaging server and react to commands it pushes back, over a
//! single WebSocket event channel.
//!
//! ## Layers
//!
//! - **Wire**: RFC 6455 framing and upgrade handshake ([`protocol`], [`codec`])
//!   carrying `["event", payload]` JSON envelopes
//! - **Connection**: connect, send, subscribe, disconnect ([`connection`])
//! - **Devices**: per-device state machine with a cancellable auto-park timer
//!   ([`device`])
//! - **Session**: telemetry scheduler, command dispatcher and the harness
//!   controller that ties them together ([`scheduler`], [`dispatcher`],
//!   [`harness`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use devsim::{Endpoint, SessionConfig, run_session};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = SessionConfig::new(Endpoint::parse("ws://localhost:3000/")?)
//!     .with_devices(3)
//!     .with_duration(std::time::Duration::from_secs(30));
//! let summary = run_session(config, CancellationToken::new()).await?;
//! println!("{summary}");
//! ```

pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod harness;
pub mod logging;
pub mod message;
pub mod probe;
pub mod protocol;
pub mod scheduler;
pub mod telemetry;

pub use command::{Command, CommandKind};
pub use config::{Config, Endpoint, Limits, RetryPolicy, SessionConfig, SignalSet, Timeouts};
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionState, DisconnectReason, Role};
pub use device::{CameraStatus, Device, DeviceHandle, DeviceId, DeviceState, VehicleStatus};
pub use dispatcher::{CommandDispatcher, DispatchStats};
pub use error::{
    ConfigError, ConnectError, DispatchError, Error, PingError, ProbeError, Result, ScheduleError,
    SendError,
};
pub use harness::{HarnessController, SessionOutcome, SessionSummary, run_session};
pub use message::{CloseCode, CloseFrame, Message};
pub use scheduler::{ScheduleReport, TelemetryScheduler, TelemetrySink};
pub use telemetry::TelemetryEvent;
