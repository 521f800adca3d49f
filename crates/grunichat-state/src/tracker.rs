//! Relay statistics shared by the connection worker and host callers.
//!
//! # Concurrency note
//!
//! Every mutation and every read goes through one `std::sync::Mutex`, so
//! [`StatsTracker::snapshot`] is consistent: a snapshot never shows
//! `messages_sent` from one update and `last_activity` from another.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::ConnectionState;

#[derive(Debug, Default)]
struct Inner {
    loaded_at: Option<Instant>,
    connection: ConnectionState,
    messages_sent: u64,
    messages_failed: u64,
    events_processed: u64,
    last_activity: Option<SystemTime>,
}

impl Inner {
    fn touch(&mut self) {
        self.last_activity = Some(SystemTime::now());
    }
}

/// Thread-safe counters plus load and connection state.
///
/// Created when the bridge service is built; counters only go back to
/// zero through [`StatsTracker::reset`].
#[derive(Debug, Default)]
pub struct StatsTracker {
    inner: Mutex<Inner>,
}

/// A point-in-time copy of a [`StatsTracker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Whether the service has been started and not torn down.
    pub is_loaded: bool,
    /// Whether the connection is currently `Connected`.
    pub is_connected: bool,
    /// The full connection state.
    pub connection: ConnectionState,
    /// Time since the service was loaded; `None` when not loaded.
    pub uptime: Option<Duration>,
    /// Envelopes handed to the transport successfully.
    pub messages_sent: u64,
    /// Outbound attempts that failed (including "not connected").
    pub messages_failed: u64,
    /// Inbound envelopes that reached the dispatcher.
    pub events_processed: u64,
    /// Wall-clock time of the last counter update, as Unix milliseconds.
    pub last_activity_ms: Option<u64>,
}

impl StatsSnapshot {
    /// Whole seconds of uptime, `None` when not loaded.
    pub fn uptime_seconds(&self) -> Option<u64> {
        self.uptime.map(|d| d.as_secs())
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_loaded {
            return write!(f, "not loaded");
        }
        let uptime = match self.uptime_seconds() {
            Some(secs) => format!("{secs}s"),
            None => "unknown".to_owned(),
        };
        write!(
            f,
            "loaded | connection: {} | uptime: {} | messages: {} sent / {} failed | events: {} processed",
            self.connection,
            uptime,
            self.messages_sent,
            self.messages_failed,
            self.events_processed
        )
    }
}

impl StatsTracker {
    /// Creates a tracker with zeroed counters, not loaded, disconnected.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Counters stay meaningful even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the service loaded (stamping `loaded_at`) or unloaded
    /// (clearing it).
    pub fn set_loaded(&self, loaded: bool) {
        let mut inner = self.lock();
        inner.loaded_at = loaded.then(Instant::now);
        tracing::debug!(loaded, "stats: load state changed");
    }

    /// Records the current connection state.
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.lock().connection = state;
    }

    /// Returns the recorded connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    /// Counts one successful outbound send.
    pub fn increment_messages_sent(&self) {
        let mut inner = self.lock();
        inner.messages_sent += 1;
        inner.touch();
    }

    /// Counts one failed outbound send.
    pub fn increment_messages_failed(&self) {
        let mut inner = self.lock();
        inner.messages_failed += 1;
        inner.touch();
    }

    /// Counts one inbound envelope reaching the dispatcher.
    pub fn increment_events_processed(&self) {
        let mut inner = self.lock();
        inner.events_processed += 1;
        inner.touch();
    }

    /// Zeroes the counters and forgets the last activity time.
    ///
    /// Load and connection state are left alone.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.messages_sent = 0;
        inner.messages_failed = 0;
        inner.events_processed = 0;
        inner.last_activity = None;
        tracing::info!("stats reset");
    }

    /// Takes a consistent snapshot of every field.
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        StatsSnapshot {
            is_loaded: inner.loaded_at.is_some(),
            is_connected: inner.connection.is_connected(),
            connection: inner.connection,
            uptime: inner.loaded_at.map(|at| at.elapsed()),
            messages_sent: inner.messages_sent,
            messages_failed: inner.messages_failed,
            events_processed: inner.events_processed,
            last_activity_ms: inner.last_activity.and_then(|t| {
                t.duration_since(UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_millis() as u64)
            }),
        }
    }
}
