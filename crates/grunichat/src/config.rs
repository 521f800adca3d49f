//! Runtime configuration.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Settings for one bridge instance.
///
/// Every field has a default, so a config file only needs the keys it
/// changes. `ws_url` and `plugin_id` change at runtime through
/// [`BridgeService::connect`](crate::BridgeService::connect) and
/// [`BridgeService::rename`](crate::BridgeService::rename).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bus endpoint.
    pub ws_url: String,

    /// This instance's identity: the `from` of every outbound envelope
    /// and the id in its origin tags.
    pub plugin_id: String,

    /// Relay host events (chat, joins, command results) to the bus.
    pub forward_host_to_bus: bool,

    /// Apply bus chat/commands on the host.
    pub forward_bus_to_host: bool,

    /// Upper bound on one connection attempt, in seconds. 0 disables the
    /// bound and leaves it to the OS.
    pub connect_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8765/ws".to_owned(),
            plugin_id: "minecraft".to_owned(),
            forward_host_to_bus: true,
            forward_bus_to_host: true,
            connect_timeout_secs: 10,
        }
    }
}

impl BridgeConfig {
    /// Parses and validates a JSON config.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        Self::from_json_str(&s)
    }

    /// Checks that the URL is dialable and the plugin id is non-blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_plugin_id(&self.plugin_id)?;
        validate_ws_url(&self.ws_url)?;
        Ok(())
    }

    /// The connect bound, or `None` when `connect_timeout_secs` is 0.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0)
            .then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

/// One config, shared by the service and the inbound dispatcher.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedConfig(Arc<RwLock<BridgeConfig>>);

impl SharedConfig {
    pub(crate) fn new(config: BridgeConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub(crate) fn get(&self) -> BridgeConfig {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut BridgeConfig)) {
        f(&mut self.0.write().unwrap_or_else(PoisonError::into_inner));
    }

    pub(crate) fn forward_bus_to_host(&self) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .forward_bus_to_host
    }

    pub(crate) fn forward_host_to_bus(&self) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .forward_host_to_bus
    }

    pub(crate) fn plugin_id(&self) -> String {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .plugin_id
            .clone()
    }
}

pub(crate) fn validate_plugin_id(id: &str) -> Result<(), ConfigError> {
    if id.trim().is_empty() {
        return Err(ConfigError::EmptyPluginId);
    }
    Ok(())
}

pub(crate) fn validate_ws_url(url: &str) -> Result<(), ConfigError> {
    grunichat_transport::validate_url(url).map_err(ConfigError::InvalidUrl)
}
