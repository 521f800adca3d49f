//! # GRUniChat bridge
//!
//! Links a running game server to a GRUniChat message bus over a single
//! WebSocket connection.
//!
//! The embedding application implements one trait, [`Host`], and feeds
//! server events into a [`BridgeService`]. The service takes care of the
//! connection lifecycle, the envelope protocol, inbound dispatch and
//! statistics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use grunichat::prelude::*;
//!
//! struct Console;
//!
//! impl Host for Console {
//!     fn broadcast_line(&self, line: &str) { println!("{line}"); }
//!     fn execute_command(&self, command: &str) { println!("> {command}"); }
//!     fn execute_server_command(&self, command: &str) { println!("/ {command}"); }
//! }
//!
//! # async fn run() -> Result<(), BridgeError> {
//! let bridge = BridgeServiceBuilder::new()
//!     .ws_url("ws://127.0.0.1:8765/ws")
//!     .plugin_id("survival")
//!     .build(Console)?;
//! bridge.start().await;
//! bridge.on_player_joined("Steve").await;
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
mod error;
pub mod gateway;
mod host;
mod service;

pub use config::BridgeConfig;
pub use connection::{ConnectionEvent, ConnectionManager, Endpoint, InboundHandler};
pub use dispatch::{CommandRoute, DispatchOutcome, Dispatcher, SkipReason};
pub use error::{BridgeError, ConfigError};
pub use gateway::OutboundGateway;
pub use host::Host;
pub use service::{BridgeService, BridgeServiceBuilder};

pub use grunichat_protocol as protocol;
pub use grunichat_state as state;
pub use grunichat_transport as transport;

/// Convenient re-exports for embedding applications.
pub mod prelude {
    pub use crate::{BridgeConfig, BridgeError, BridgeService, BridgeServiceBuilder, Host};
    pub use grunichat_state::{ConnectionState, StatsSnapshot};
}
