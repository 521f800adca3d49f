//! The connection lifecycle state machine.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of the single upstream connection.
///
/// ```text
///                 Start              Opened
/// Disconnected ─────────→ Connecting ───────→ Connected
///      ↑                      │                   │
///      │        Failed/Closed │                   │ Stop
///      ├──────────────────────┘                   ▼
///      │               Closed                  Closing
///      └──────────────────────────────────────────┘
/// ```
///
/// `Connected` also drops straight to `Disconnected` on `Failed` or
/// `Closed` (the peer went away), and `Connecting` moves to `Closing` on
/// `Stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ConnectionState {
    /// No socket and no worker.
    #[default]
    Disconnected,
    /// A worker is opening the socket.
    Connecting,
    /// The socket is open; sends are accepted.
    Connected,
    /// A close has been requested and is in flight.
    Closing,
}

/// An event that moves a [`ConnectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A worker was spawned for a new connection attempt.
    Start,
    /// The socket finished opening.
    Opened,
    /// Opening or running the socket failed.
    Failed,
    /// A close was requested by the bridge.
    Stop,
    /// The socket is gone (clean close, or close completed).
    Closed,
}

impl ConnectionState {
    /// Returns `true` only in [`ConnectionState::Connected`].
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` while a socket or worker may exist.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Applies `transition`.
    ///
    /// Returns `None` when the transition is not valid from this state,
    /// e.g. `Opened` while `Disconnected`. Callers keep the old state in
    /// that case.
    pub fn apply(self, transition: Transition) -> Option<Self> {
        use ConnectionState::*;
        use Transition::*;

        match (self, transition) {
            (Disconnected, Start) => Some(Connecting),
            (Connecting, Opened) => Some(Connected),
            (Connecting | Connected, Failed | Closed) => Some(Disconnected),
            (Connecting | Connected, Stop) => Some(Closing),
            (Closing, Closed | Failed) => Some(Disconnected),
            (Disconnected, Stop | Closed) => Some(Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Closing => write!(f, "Closing"),
        }
    }
}
