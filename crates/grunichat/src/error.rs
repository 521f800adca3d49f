//! Unified error type for the bridge.

use grunichat_protocol::ProtocolError;
use grunichat_transport::TransportError;

/// A configuration value the bridge cannot use.
///
/// Returned before anything is changed: an operation that fails with a
/// `ConfigError` leaves the connection in its previous state.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The WebSocket URL is not a plaintext `ws://` URL with a host.
    #[error("unusable url: {0}")]
    InvalidUrl(#[source] TransportError),

    /// The plugin id is empty or whitespace.
    #[error("plugin id must not be empty")]
    EmptyPluginId,

    /// The config file could not be read.
    #[error("read config failed: {0}")]
    Read(#[source] std::io::Error),

    /// The config file is not valid JSON for [`BridgeConfig`](crate::BridgeConfig).
    #[error("invalid config: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Top-level error that wraps all crate-specific errors.
///
/// `Display` is short and human-readable, so a command surface can show
/// it to an operator as the reason an operation failed.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A transport-level error (connect, send, close).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A configuration error (bad url, empty id).
    #[error(transparent)]
    Config(#[from] ConfigError),
}
