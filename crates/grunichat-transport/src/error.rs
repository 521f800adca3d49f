use std::time::Duration;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The target is not a usable plaintext `ws://` URL.
    #[error("invalid WebSocket url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Opening the connection failed (DNS, TCP, or the HTTP upgrade).
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Opening the connection did not finish within the configured bound.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),
}
