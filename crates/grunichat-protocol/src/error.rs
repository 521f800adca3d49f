//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means "this payload could not be turned into
//! (or out of) an [`Envelope`](crate::Envelope)". It never carries
//! connection state: the caller drops the payload and moves on.

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The payload was empty or whitespace only.
    #[error("empty payload")]
    EmptyPayload,

    /// The payload was not valid UTF-8 text.
    #[error("payload is not text: {0}")]
    NotText(#[source] std::str::Utf8Error),

    /// The text was not JSON, or the JSON did not fit the envelope shape
    /// (for example `"body": null` or a non-numeric `currentTime`).
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// Serialization failed (turning an envelope into text).
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload parsed, but is not an envelope at all.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
