//! `BridgeService` builder and facade.
//!
//! This is what an embedding host talks to. It ties together the
//! layers: host events → gateway → connection, and
//! connection → dispatcher → host.

use std::sync::Arc;
use std::time::Duration;

use grunichat_state::{ConnectionState, StatsSnapshot, StatsTracker};
use grunichat_transport::{Connector, WebSocketConnector};
use tokio::sync::Mutex;

use crate::config::{SharedConfig, validate_plugin_id, validate_ws_url};
use crate::connection::{ConnectionManager, Endpoint};
use crate::dispatch::Dispatcher;
use crate::gateway::OutboundGateway;
use crate::host::Host;
use crate::{BridgeConfig, BridgeError};

/// Event text sent when the bridge shuts down.
const UNLOADED_EVENT: &str = "plugin unloaded";
/// Event text sent when the host reports startup.
const STARTUP_EVENT: &str = "server started";
/// Command name reported for results scraped from server output.
const SCRAPED_COMMAND: &str = "command";

/// Builder for a [`BridgeService`].
///
/// # Example
///
/// ```rust,ignore
/// use grunichat::prelude::*;
///
/// let bridge = BridgeServiceBuilder::new()
///     .ws_url("ws://bus.local:8765/ws")
///     .plugin_id("survival")
///     .build(my_host)?;
/// bridge.start().await;
/// ```
pub struct BridgeServiceBuilder {
    config: BridgeConfig,
}

impl BridgeServiceBuilder {
    /// Creates a builder with [`BridgeConfig::default`].
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the bus URL.
    pub fn ws_url(mut self, url: &str) -> Self {
        self.config.ws_url = url.to_string();
        self
    }

    /// Sets this instance's identity.
    pub fn plugin_id(mut self, id: &str) -> Self {
        self.config.plugin_id = id.to_string();
        self
    }

    /// Validates the config and builds a service on the WebSocket
    /// transport. Nothing connects until [`BridgeService::start`].
    pub fn build<H: Host>(self, host: H) -> Result<BridgeService<H>, BridgeError> {
        let connector = match self.config.connect_timeout() {
            Some(limit) => WebSocketConnector::with_connect_timeout(limit),
            None => WebSocketConnector::new(),
        };
        self.build_with(host, connector)
    }

    /// Like [`build`](Self::build), with a caller-supplied transport.
    pub fn build_with<H: Host, C: Connector>(
        self,
        host: H,
        connector: C,
    ) -> Result<BridgeService<H, C>, BridgeError> {
        self.config.validate()?;

        let config = SharedConfig::new(self.config);
        let stats = Arc::new(StatsTracker::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(host),
            Arc::clone(&stats),
            config.clone(),
        ));
        let connection = Arc::new(ConnectionManager::new(
            connector,
            dispatcher,
            Arc::clone(&stats),
        ));
        let gateway =
            OutboundGateway::new(Arc::clone(&connection), Arc::clone(&stats), config.clone());

        Ok(BridgeService {
            config,
            stats,
            connection,
            gateway,
            ops: Mutex::new(()),
        })
    }
}

impl Default for BridgeServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One bridge instance: a host on one side, the bus on the other.
///
/// Every method takes `&self`, so the service can sit in an `Arc` shared
/// by the host's event callbacks and its command surface.
pub struct BridgeService<H: Host, C: Connector = WebSocketConnector> {
    config: SharedConfig,
    stats: Arc<StatsTracker>,
    connection: Arc<ConnectionManager<C, Dispatcher<H>>>,
    gateway: OutboundGateway<C, Dispatcher<H>>,
    /// Serializes operations that change the config and then restart.
    ops: Mutex<()>,
}

impl<H: Host, C: Connector> BridgeService<H, C> {
    fn endpoint(&self) -> Endpoint {
        let config = self.config.get();
        Endpoint {
            url: config.ws_url,
            plugin_id: config.plugin_id,
        }
    }

    // -- Lifecycle --------------------------------------------------------

    /// Marks the bridge loaded and starts connecting.
    pub async fn start(&self) {
        let _ops = self.ops.lock().await;
        self.stats.set_loaded(true);
        let endpoint = self.endpoint();
        tracing::info!(plugin_id = %endpoint.plugin_id, "bridge loaded");
        self.connection.start(endpoint).await;
    }

    /// Announces the unload (best effort), disconnects and marks the
    /// bridge unloaded.
    pub async fn shutdown(&self) {
        let _ops = self.ops.lock().await;
        if self.connection.is_connected() {
            self.gateway.send_event(UNLOADED_EVENT).await;
        }
        self.connection.stop().await;
        self.stats.set_loaded(false);
        tracing::info!("bridge unloaded");
    }

    /// Drops the current connection and connects again, optionally to a
    /// new URL. A bad URL is rejected before anything changes.
    pub async fn reconnect(&self, url: Option<&str>) -> Result<(), BridgeError> {
        let _ops = self.ops.lock().await;
        if let Some(url) = url {
            validate_ws_url(url)?;
            self.config.update(|c| c.ws_url = url.to_owned());
        }
        self.connection.reconnect(self.endpoint()).await;
        Ok(())
    }

    /// Connects to `url`, replacing any current connection.
    pub async fn connect(&self, url: &str) -> Result<(), BridgeError> {
        self.reconnect(Some(url)).await
    }

    /// Closes the connection. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let _ops = self.ops.lock().await;
        self.connection.stop().await;
    }

    /// Changes this instance's identity and reconnects so the new
    /// `hello` and all later envelopes carry it.
    pub async fn rename(&self, plugin_id: &str) -> Result<(), BridgeError> {
        let _ops = self.ops.lock().await;
        validate_plugin_id(plugin_id)?;
        let old = self.config.plugin_id();
        self.config.update(|c| c.plugin_id = plugin_id.to_owned());
        tracing::info!(from = %old, to = %plugin_id, "plugin renamed");
        self.connection.reconnect(self.endpoint()).await;
        Ok(())
    }

    // -- Status -----------------------------------------------------------

    /// Point-in-time counters and state.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// One-line status for operators.
    pub fn status_summary(&self) -> String {
        format!("[{}] {}", self.config.plugin_id(), self.stats.snapshot())
    }

    /// Zeroes the counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> BridgeConfig {
        self.config.get()
    }

    /// `true` only while connected.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Waits until the connection reaches `state`. Returns `false` on
    /// timeout.
    pub async fn wait_for_state(&self, state: ConnectionState, limit: Duration) -> bool {
        self.connection.wait_for_state(state, limit).await
    }

    // -- Outbound ---------------------------------------------------------

    /// See [`OutboundGateway::send_chat`].
    pub async fn send_chat(&self, sender: &str, message: &str) -> bool {
        self.gateway.send_chat(sender, message).await
    }

    /// See [`OutboundGateway::send_event`].
    pub async fn send_event(&self, detail: &str) -> bool {
        self.gateway.send_event(detail).await
    }

    /// See [`OutboundGateway::send_command_result`].
    pub async fn send_command_result(&self, player: &str, command: &str, result: &str) -> bool {
        self.gateway.send_command_result(player, command, result).await
    }

    /// See [`OutboundGateway::send_command`].
    pub async fn send_command(&self, command: &str) -> bool {
        self.gateway.send_command(command).await
    }

    // -- Host events ------------------------------------------------------

    /// Feeds one line of server output.
    ///
    /// Player chat is relayed as chat. Any other line shaped like
    /// `[<player>: <result>]` is relayed as a command result. Everything
    /// else is ignored and returns `false`.
    pub async fn on_server_line(&self, text: &str, is_player_chat: bool, player: Option<&str>) -> bool {
        if is_player_chat {
            if let Some(player) = player.filter(|p| !p.is_empty()) {
                return self.gateway.send_chat(player, text).await;
            }
        }
        match parse_command_result(text) {
            Some((player, result)) => {
                self.gateway
                    .send_command_result(player, SCRAPED_COMMAND, result)
                    .await
            }
            None => false,
        }
    }

    /// Relays a join.
    pub async fn on_player_joined(&self, name: &str) -> bool {
        self.gateway.send_event(&format!("{name} joined the game")).await
    }

    /// Relays a leave.
    pub async fn on_player_left(&self, name: &str) -> bool {
        self.gateway.send_event(&format!("{name} left the game")).await
    }

    /// Relays server startup.
    pub async fn on_server_startup(&self) -> bool {
        self.gateway.send_event(STARTUP_EVENT).await
    }
}

/// Splits `[<player>: <result>]` into trimmed parts.
fn parse_command_result(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (player, result) = inner.split_once(':')?;
    Some((player.trim(), result.trim()))
}
