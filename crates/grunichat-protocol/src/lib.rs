//! Wire protocol for GRUniChat.
//!
//! This crate defines the "language" the bridge and the message bus speak:
//!
//! - **Types** ([`Envelope`], [`Body`], [`MessageKind`]): the JSON
//!   structure that travels in every WebSocket text frame.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how envelopes are
//!   converted to/from text.
//! - **Origin tagging** ([`origin`]): the `"[<id>] "` marker that lets a
//!   peer tell which bridge produced a piece of text.
//! - **Errors** ([`ProtocolError`]): what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and the relay
//! (host actions). It knows nothing about sockets or hosts.
//!
//! ```text
//! Transport (text frames) → Protocol (Envelope) → Relay (dispatch / gateway)
//! ```

mod codec;
mod error;
pub mod origin;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{generate_total_id, now_millis, Body, Envelope, MessageKind};
