//! The event-channel connection: lifecycle, send primitives and inbound
//! event subscriptions.
//!
//! ```rust,ignore
//! use devsim::{ConnectionManager, Config, Endpoint};
//!
//! let endpoint = Endpoint::parse("ws://localhost:3000/")?;
//! let handle = ConnectionManager::new(Config::default()).connect(&endpoint).await?;
//! handle.subscribe("deviceCommand", |payload| println!("{payload}"));
//! handle.send("testMessage", &serde_json::json!({"message": "hi"})).await?;
//! handle.disconnect().await;
//! ```

mod manager;
mod role;
mod state;
mod subscriptions;

pub use manager::{ConnectionHandle, ConnectionManager};
pub use role::Role;
pub use state::{ConnectionState, DisconnectReason};
pub use subscriptions::{DisconnectHandler, EventHandler};
