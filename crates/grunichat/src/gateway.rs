//! Outbound: host events to envelopes.

use std::sync::Arc;

use grunichat_protocol::{Body, Envelope, MessageKind, origin};
use grunichat_state::StatsTracker;
use grunichat_transport::Connector;

use crate::config::SharedConfig;
use crate::connection::{ConnectionManager, InboundHandler};

/// Turns host events into envelopes and sends them.
///
/// Every send returns `bool` and never fails loudly. While disconnected
/// it returns `false` without touching the socket and counts a failed
/// message. With host-to-bus relay turned off it returns `false` and
/// counts nothing.
pub struct OutboundGateway<C: Connector, D: InboundHandler> {
    connection: Arc<ConnectionManager<C, D>>,
    stats: Arc<StatsTracker>,
    config: SharedConfig,
}

impl<C: Connector, D: InboundHandler> OutboundGateway<C, D> {
    pub(crate) fn new(
        connection: Arc<ConnectionManager<C, D>>,
        stats: Arc<StatsTracker>,
        config: SharedConfig,
    ) -> Self {
        Self {
            connection,
            stats,
            config,
        }
    }

    /// Relays a chat line. Neither the sender nor the text is tagged.
    pub async fn send_chat(&self, sender: &str, message: &str) -> bool {
        self.publish(
            MessageKind::Chat,
            Body {
                sender: sender.to_owned(),
                chat_message: message.to_owned(),
                ..Body::default()
            },
        )
        .await
    }

    /// Relays a free-form event.
    pub async fn send_event(&self, detail: &str) -> bool {
        self.publish(
            MessageKind::Event,
            Body {
                event_detail: detail.to_owned(),
                ..Body::default()
            },
        )
        .await
    }

    /// Relays the result of a command a player ran, as an event.
    pub async fn send_command_result(&self, player: &str, command: &str, result: &str) -> bool {
        self.send_event(&command_result_detail(player, command, result))
            .await
    }

    /// Asks peers to run `command`.
    pub async fn send_command(&self, command: &str) -> bool {
        self.publish(
            MessageKind::Command,
            Body {
                command: command.to_owned(),
                ..Body::default()
            },
        )
        .await
    }

    async fn publish(&self, kind: MessageKind, body: Body) -> bool {
        if !self.config.forward_host_to_bus() {
            tracing::trace!(%kind, "host-to-bus relay disabled");
            return false;
        }
        if !self.connection.is_connected() {
            tracing::debug!(%kind, "not connected, dropping outbound message");
            self.stats.increment_messages_failed();
            return false;
        }

        let self_id = self.config.plugin_id();
        let body = tag_body(&kind, body, &self_id);
        let envelope = Envelope::compose(kind, body, &self_id);

        if self.connection.send(&envelope).await {
            self.stats.increment_messages_sent();
            true
        } else {
            self.stats.increment_messages_failed();
            false
        }
    }
}

/// `Player <player> executed: <command> -> <result>`.
pub(crate) fn command_result_detail(player: &str, command: &str, result: &str) -> String {
    format!("Player {player} executed: {command} -> {result}")
}

/// Stamps this instance's id onto the text fields of a non-chat body.
fn tag_body(kind: &MessageKind, mut body: Body, self_id: &str) -> Body {
    if *kind == MessageKind::Chat {
        return body;
    }
    for field in [&mut body.sender, &mut body.command, &mut body.event_detail] {
        if !field.is_empty() {
            *field = origin::tag(field, self_id);
        }
    }
    body
}
