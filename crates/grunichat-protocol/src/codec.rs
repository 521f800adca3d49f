//! Codec trait and the JSON implementation.
//!
//! A codec turns an [`Envelope`] into the text of a WebSocket frame and
//! turns raw frame bytes back into an envelope. Decoding never panics: a
//! bad payload comes back as a [`ProtocolError`] and the caller drops it.

use crate::{Envelope, ProtocolError};

/// Encodes envelopes to frame text and decodes frame bytes to envelopes.
///
/// `Send + Sync + 'static` because the connection worker and the host's
/// callers share one codec across Tokio tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes an envelope into the text of one frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode(&self, envelope: &Envelope) -> Result<String, ProtocolError>;

    /// Parses one inbound frame.
    ///
    /// # Errors
    /// - `EmptyPayload`: nothing but whitespace
    /// - `NotText`: not UTF-8
    /// - `Decode`: not JSON, or a field has the wrong type
    /// - `InvalidMessage`: valid JSON that is not an object
    fn decode(&self, raw: &[u8]) -> Result<Envelope, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`), the bus's native format.
///
/// ## Example
///
/// ```rust
/// use grunichat_protocol::{Body, Codec, Envelope, JsonCodec, MessageKind};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::compose(
///     MessageKind::Event,
///     Body { event_detail: "server started".into(), ..Body::default() },
///     "minecraft",
/// );
///
/// let text = codec.encode(&envelope).unwrap();
/// let decoded = codec.decode(text.as_bytes()).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<String, ProtocolError> {
        serde_json::to_string(envelope).map_err(ProtocolError::Encode)
    }

    fn decode(&self, raw: &[u8]) -> Result<Envelope, ProtocolError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(ProtocolError::EmptyPayload);
        }
        let text = std::str::from_utf8(raw).map_err(ProtocolError::NotText)?;

        // Parse to a `Value` first: a bare array or string must not be
        // accepted as an envelope with every field defaulted.
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(ProtocolError::Decode)?;
        if !value.is_object() {
            return Err(ProtocolError::InvalidMessage(
                "expected a JSON object".into(),
            ));
        }
        serde_json::from_value(value).map_err(ProtocolError::Decode)
    }
}
