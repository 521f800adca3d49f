//! Connection state and relay statistics for GRUniChat.
//!
//! This crate answers two questions for the rest of the bridge:
//!
//! 1. **Where is the connection?** [`ConnectionState`] and the
//!    [`Transition`]s that move it.
//! 2. **What has the bridge done?** [`StatsTracker`], a lock-guarded
//!    set of counters with a consistent [`StatsSnapshot`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Relay (above)  ← connection manager drives transitions, dispatcher and
//!     ↕            gateway bump counters, status UI reads snapshots
//! State (this crate)
//! ```

mod state;
mod tracker;

pub use state::{ConnectionState, Transition};
pub use tracker::{StatsSnapshot, StatsTracker};
