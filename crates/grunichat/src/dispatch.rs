//! Inbound dispatch: decoded envelope in, host action out.
//!
//! [`Dispatcher::dispatch`] is a pure branch on the envelope kind plus
//! calls into the [`Host`]. It returns a [`DispatchOutcome`] describing
//! what it did, so it can be tested without a socket.

use std::sync::Arc;

use grunichat_protocol::{Codec, Envelope, JsonCodec, MessageKind, ProtocolError, origin};
use grunichat_state::StatsTracker;

use crate::config::SharedConfig;
use crate::connection::InboundHandler;
use crate::host::Host;

/// Display name for a chat sender that left `sender` empty.
const UNKNOWN_SENDER: &str = "unknown";

/// Where an inbound command goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRoute {
    /// `!!`-prefixed: a host-console command, passed as is.
    HostConsole(String),
    /// `/`-prefixed: a raw server command, slash removed.
    Server(String),
    /// No recognized prefix: handed to the host console unchanged.
    PassThrough(String),
}

impl CommandRoute {
    /// Classifies an already-stripped command.
    pub fn classify(command: &str) -> Self {
        if command.starts_with("!!") {
            Self::HostConsole(command.to_owned())
        } else if let Some(raw) = command.strip_prefix('/') {
            Self::Server(raw.to_owned())
        } else {
            Self::PassThrough(command.to_owned())
        }
    }

    /// The text handed to the host.
    pub fn command(&self) -> &str {
        match self {
            Self::HostConsole(c) | Self::Server(c) | Self::PassThrough(c) => c,
        }
    }
}

/// Why a well-formed envelope caused no action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// `type` is not one the bridge handles.
    UnknownKind(String),
    /// The body field the kind needs is empty.
    EmptyField(&'static str),
    /// An `ack` without `status`.
    MissingStatus,
}

/// What the dispatcher did with one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Line shown to players.
    Broadcast(String),
    /// Command handed to the host.
    Command(CommandRoute),
    /// Peer event, logged.
    EventLogged(String),
    /// Peer announcement, logged.
    PeerHello(String),
    /// Successful ack.
    Acknowledged,
    /// Ack with a non-success status.
    AckFailed {
        /// Correlation id of the envelope being acknowledged.
        total_id: String,
        /// The status the peer reported.
        status: String,
    },
    /// Peer reported an error.
    PeerError {
        /// Correlation id.
        total_id: String,
        /// Error code, if any.
        code: Option<String>,
        /// Error text.
        error: String,
    },
    /// Chat or command that would have reached the host, but relaying
    /// bus traffic to the host is turned off.
    Suppressed(MessageKind),
    /// Nothing to do.
    Skipped(SkipReason),
}

/// Routes inbound envelopes to the host and counts them.
pub struct Dispatcher<H: Host> {
    host: Arc<H>,
    stats: Arc<StatsTracker>,
    config: SharedConfig,
    codec: JsonCodec,
}

impl<H: Host> Dispatcher<H> {
    pub(crate) fn new(host: Arc<H>, stats: Arc<StatsTracker>, config: SharedConfig) -> Self {
        Self {
            host,
            stats,
            config,
            codec: JsonCodec,
        }
    }

    /// Decodes one raw frame and dispatches it.
    ///
    /// A frame that doesn't decode is returned as an error and counts
    /// nothing.
    pub fn handle_frame(&self, data: &[u8]) -> Result<DispatchOutcome, ProtocolError> {
        let envelope = self.codec.decode(data)?;
        Ok(self.dispatch(&envelope))
    }

    /// Dispatches one decoded envelope. Counts it as processed first,
    /// whatever the branch.
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        self.stats.increment_events_processed();

        match &envelope.kind {
            MessageKind::Chat => self.on_chat(envelope),
            MessageKind::Command => self.on_command(envelope),
            MessageKind::Event => on_event(envelope),
            MessageKind::Hello => on_hello(envelope),
            MessageKind::Ack => on_ack(envelope),
            MessageKind::Error => on_error(envelope),
            MessageKind::Other(kind) => {
                tracing::debug!(kind = %kind, from = %envelope.from, "unhandled message type");
                DispatchOutcome::Skipped(SkipReason::UnknownKind(kind.clone()))
            }
        }
    }

    fn on_chat(&self, envelope: &Envelope) -> DispatchOutcome {
        let message = &envelope.body.chat_message;
        if message.is_empty() {
            return skip_empty(envelope, "chatMessage");
        }

        let line = format!("<{}> {message}", display_sender(envelope));
        if !self.config.forward_bus_to_host() {
            tracing::debug!(%line, "bus-to-host relay disabled, chat not shown");
            return DispatchOutcome::Suppressed(MessageKind::Chat);
        }

        tracing::info!(from = %envelope.from, %line, "chat from bus");
        self.host.broadcast_line(&line);
        DispatchOutcome::Broadcast(line)
    }

    fn on_command(&self, envelope: &Envelope) -> DispatchOutcome {
        let raw = &envelope.body.command;
        if raw.is_empty() {
            return skip_empty(envelope, "command");
        }
        let command = if envelope.from.is_empty() {
            raw.as_str()
        } else {
            origin::strip(raw, &envelope.from)
        };
        if command.is_empty() {
            return skip_empty(envelope, "command");
        }

        let route = CommandRoute::classify(command);
        if !self.config.forward_bus_to_host() {
            tracing::debug!(?route, "bus-to-host relay disabled, command not run");
            return DispatchOutcome::Suppressed(MessageKind::Command);
        }

        tracing::info!(from = %envelope.from, ?route, "command from bus");
        match &route {
            CommandRoute::Server(c) => self.host.execute_server_command(c),
            CommandRoute::HostConsole(c) | CommandRoute::PassThrough(c) => {
                self.host.execute_command(c)
            }
        }
        DispatchOutcome::Command(route)
    }
}

impl<H: Host> InboundHandler for Dispatcher<H> {
    fn on_frame(&self, data: &[u8]) {
        if let Err(e) = self.handle_frame(data) {
            tracing::debug!(error = %e, len = data.len(), "dropping malformed frame");
        }
    }
}

/// `[<from>] <sender>`, or just the sender when `from` is empty.
fn display_sender(envelope: &Envelope) -> String {
    let sender = match envelope.body.sender.as_str() {
        "" => UNKNOWN_SENDER,
        s => s,
    };
    if envelope.from.is_empty() {
        sender.to_owned()
    } else {
        origin::tag(sender, &envelope.from)
    }
}

fn skip_empty(envelope: &Envelope, field: &'static str) -> DispatchOutcome {
    tracing::debug!(kind = %envelope.kind, field, "empty body field, skipping");
    DispatchOutcome::Skipped(SkipReason::EmptyField(field))
}

fn on_event(envelope: &Envelope) -> DispatchOutcome {
    let detail = &envelope.body.event_detail;
    if detail.is_empty() {
        return skip_empty(envelope, "eventDetail");
    }
    tracing::info!(from = %envelope.from, detail = %detail, "event from bus");
    DispatchOutcome::EventLogged(detail.clone())
}

fn on_hello(envelope: &Envelope) -> DispatchOutcome {
    tracing::info!(
        peer = %envelope.from,
        detail = %envelope.body.event_detail,
        "peer connected"
    );
    DispatchOutcome::PeerHello(envelope.from.clone())
}

fn on_ack(envelope: &Envelope) -> DispatchOutcome {
    let Some(status) = &envelope.status else {
        tracing::debug!(total_id = %envelope.total_id, "ack without status");
        return DispatchOutcome::Skipped(SkipReason::MissingStatus);
    };
    if status == "success" {
        tracing::trace!(total_id = %envelope.total_id, "ack");
        return DispatchOutcome::Acknowledged;
    }

    tracing::warn!(
        total_id = %envelope.total_id,
        status = %status,
        message = envelope.message.as_deref().unwrap_or(""),
        "peer rejected message"
    );
    DispatchOutcome::AckFailed {
        total_id: envelope.total_id.clone(),
        status: status.clone(),
    }
}

fn on_error(envelope: &Envelope) -> DispatchOutcome {
    // Some peers put the text in the body instead of `error`.
    let error = envelope
        .error
        .clone()
        .unwrap_or_else(|| envelope.body.event_detail.clone());
    let code = envelope.code_text();

    tracing::error!(
        total_id = %envelope.total_id,
        code = code.as_deref().unwrap_or("-"),
        error = %error,
        "peer reported error"
    );
    DispatchOutcome::PeerError {
        total_id: envelope.total_id.clone(),
        code,
        error,
    }
}

// =========================================================================
// Tests
// =========================================================================
