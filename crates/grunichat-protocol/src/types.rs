//! Core protocol types for GRUniChat's wire format.
//!
//! Every WebSocket text frame exchanged with the bus carries exactly one
//! [`Envelope`] serialized as JSON:
//!
//! ```text
//! {
//!   "from": "minecraft",
//!   "type": "chat",
//!   "body": { "sender": "Alice", "chatMessage": "hi", "command": "", "eventDetail": "" },
//!   "totalId": "1b4e28ba-2fa1-41d2-883f-0016d3cca427",
//!   "currentTime": "1718000000000"
//! }
//! ```
//!
//! The same shape travels in both directions. Replies from the bus
//! (`ack` / `error`) add a few top-level fields that we read but never
//! write.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// MessageKind: the "type" tag
// ---------------------------------------------------------------------------

/// The `type` tag of an envelope.
///
/// Known tags get their own variant. Anything else is kept verbatim in
/// [`MessageKind::Other`] so a newer peer's extension types survive a
/// decode instead of failing it. The dispatcher decides what to do with
/// them (it skips them).
///
/// `#[serde(from = "String", into = "String")]` makes serde go through
/// the `From` impls below, so the wire form is always a plain string
/// like `"chat"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Liveness/identity announcement sent right after a connection opens.
    Hello,
    /// A chat line to display.
    Chat,
    /// A command to execute on the receiving side.
    Command,
    /// A free-form event notification (player joined, server started...).
    Event,
    /// Peer acknowledgement of an earlier envelope.
    Ack,
    /// Peer error report about an earlier envelope.
    Error,
    /// An unrecognized or extension tag.
    Other(String),
}

impl MessageKind {
    /// Returns the wire form of this tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::Chat => "chat",
            Self::Command => "command",
            Self::Event => "event",
            Self::Ack => "ack",
            Self::Error => "error",
            Self::Other(tag) => tag,
        }
    }
}

impl Default for MessageKind {
    /// A missing `type` field decodes as an empty extension tag.
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "hello" => Self::Hello,
            "chat" => Self::Chat,
            "command" => Self::Command,
            "event" => Self::Event,
            "ack" => Self::Ack,
            "error" => Self::Error,
            _ => Self::Other(tag),
        }
    }
}

impl From<&str> for MessageKind {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_owned())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Body: the typed payload fields
// ---------------------------------------------------------------------------

/// The `body` record of an envelope.
///
/// All four fields are always present on the wire. A field that is not
/// relevant to the envelope's kind is the empty string, never `null` and
/// never missing, so peers don't have to handle three kinds of "nothing".
///
/// On the way in we are more forgiving: missing fields and explicit
/// `null`s both read as `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    /// Display name of whoever produced the content.
    #[serde(default, deserialize_with = "nullable_string")]
    pub sender: String,
    /// Chat text, for `chat` envelopes.
    #[serde(default, deserialize_with = "nullable_string")]
    pub chat_message: String,
    /// Command text, for `command` envelopes.
    #[serde(default, deserialize_with = "nullable_string")]
    pub command: String,
    /// Human-readable event text, for `event` / `hello` envelopes.
    #[serde(default, deserialize_with = "nullable_string")]
    pub event_detail: String,
}

impl Body {
    /// Keeps only the fields that belong to `kind` and blanks the rest.
    ///
    /// | kind | kept fields |
    /// |---|---|
    /// | `chat` | `sender`, `chatMessage` |
    /// | `command` | `sender`, `command` |
    /// | `hello`, `event`, `ack`, `error` | `sender`, `eventDetail` |
    /// | extension | everything |
    pub fn retain_for(self, kind: &MessageKind) -> Self {
        match kind {
            MessageKind::Chat => Self {
                sender: self.sender,
                chat_message: self.chat_message,
                ..Self::default()
            },
            MessageKind::Command => Self {
                sender: self.sender,
                command: self.command,
                ..Self::default()
            },
            MessageKind::Hello
            | MessageKind::Event
            | MessageKind::Ack
            | MessageKind::Error => Self {
                sender: self.sender,
                event_detail: self.event_detail,
                ..Self::default()
            },
            MessageKind::Other(_) => self,
        }
    }
}

/// Reads a string field, treating `null` as `""`.
fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Envelope: the top-level wire format
// ---------------------------------------------------------------------------

/// The top-level message wrapper. Every frame on the wire is an Envelope.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ from: "minecraft"                    │  ← who sent it
/// │ type: chat                           │  ← what it is
/// │ totalId: "1b4e28ba-..."              │  ← correlation id
/// │ currentTime: 1718000000000           │  ← creation time (ms)
/// │ ┌──────────────────────────────────┐ │
/// │ │ body: { sender, chatMessage, ..} │ │  ← the content
/// │ └──────────────────────────────────┘ │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Identifier of the sending endpoint.
    #[serde(default, deserialize_with = "nullable_string")]
    pub from: String,

    /// The envelope's kind. Serialized under the `type` key.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,

    /// The content fields.
    #[serde(default)]
    pub body: Body,

    /// Unique id of this envelope, echoed back by `ack` / `error` replies.
    #[serde(default, deserialize_with = "nullable_string")]
    pub total_id: String,

    /// Milliseconds since the Unix epoch at creation.
    ///
    /// Written as a decimal string; read from either a string or a number.
    #[serde(default, with = "millis_text")]
    pub current_time: u64,

    /// `ack` only: `"success"` or a failure status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// `ack` only: free-form explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// `error` only: error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// `error` only: error code (number or string, peer's choice).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<serde_json::Value>,

    /// `ack` / `error`: the peer's own timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Value>,
}

impl Envelope {
    /// Builds a fresh outbound envelope.
    ///
    /// Stamps `from = self_id`, a new random `totalId` and the current
    /// time, and copies only the body fields relevant to `kind`
    /// (see [`Body::retain_for`]).
    pub fn compose(kind: MessageKind, fields: Body, self_id: &str) -> Self {
        let body = fields.retain_for(&kind);
        Self {
            from: self_id.to_owned(),
            kind,
            body,
            total_id: generate_total_id(),
            current_time: now_millis(),
            status: None,
            message: None,
            error: None,
            code: None,
            timestamp: None,
        }
    }

    /// Builds the `hello` announcement for `self_id`.
    ///
    /// The event text carries the origin tag; the sender is the bare id.
    pub fn hello(self_id: &str) -> Self {
        Self::compose(
            MessageKind::Hello,
            Body {
                sender: self_id.to_owned(),
                event_detail: crate::origin::tag(
                    &format!("Plugin {self_id} connected"),
                    self_id,
                ),
                ..Body::default()
            },
            self_id,
        )
    }

    /// Renders `code` for logs: strings without quotes, other values as JSON.
    pub fn code_text(&self) -> Option<String> {
        self.code.as_ref().map(|code| match code {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Returns a fresh random id in the 8-4-4-4-12 hex layout of a version 4
/// UUID (122 random bits).
pub fn generate_total_id() -> String {
    let mut bytes: [u8; 16] = rand::rng().random();
    bytes[6] = (bytes[6] & 0x0f) | 0x40; // version 4
    bytes[8] = (bytes[8] & 0x3f) | 0x80; // RFC 4122 variant

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Milliseconds since the Unix epoch (0 if the clock is before 1970).
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// `currentTime` travels as a decimal string, but some peers send a number.
mod millis_text {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
            Null(()),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Null(()) => Ok(0),
            Raw::Text(s) if s.trim().is_empty() => Ok(0),
            Raw::Text(s) => s.trim().parse().map_err(D::Error::custom),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
