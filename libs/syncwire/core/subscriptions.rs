//! Subscription registry
//!
//! The single source of truth for "what should be subscribed". The
//! connection manager never persists subscription state itself; whenever a
//! connection opens the registry replays exactly one subscribe frame per
//! desired `(kind, key)` pair, no matter how the set was built up.

use crate::core::connection::ConnectionManager;
use crate::core::connection_state::ConnectionStatus;
use crate::protocol::{self, ChannelKind};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Tracks the desired channel set and replays it through the connection
pub struct SubscriptionRegistry {
    conn: Arc<ConnectionManager>,
    desired: Mutex<BTreeSet<(ChannelKind, String)>>,
}

impl SubscriptionRegistry {
    pub fn new(conn: Arc<ConnectionManager>) -> Self {
        Self {
            conn,
            desired: Mutex::new(BTreeSet::new()),
        }
    }

    /// Add a `(kind, key)` pair to the desired set
    ///
    /// Idempotent: re-subscribing an already-desired pair sends nothing.
    /// A newly-desired pair is announced immediately when the connection is
    /// open, otherwise it rides the next replay.
    pub fn subscribe(&self, kind: ChannelKind, key: &str) {
        let inserted = self.desired.lock().insert((kind, key.to_string()));
        if inserted && self.conn.status() == ConnectionStatus::Open {
            self.conn.send_frame(protocol::subscribe_frame(kind, key));
        }
    }

    /// Remove a pair from the desired set, telling the server when open
    pub fn unsubscribe(&self, kind: ChannelKind, key: &str) {
        let removed = self.desired.lock().remove(&(kind, key.to_string()));
        if removed && self.conn.status() == ConnectionStatus::Open {
            self.conn.send_frame(protocol::unsubscribe_frame(kind, key));
        }
    }

    /// Replay one subscribe frame per desired pair
    ///
    /// Called on every transition into `Open`, including after reconnects.
    pub fn replay(&self) {
        let desired = self.desired.lock().clone();
        debug!(channels = desired.len(), "replaying subscriptions");
        for (kind, key) in &desired {
            self.conn.send_frame(protocol::subscribe_frame(*kind, key));
        }
    }

    /// Current desired set (sorted)
    pub fn desired(&self) -> Vec<(ChannelKind, String)> {
        self.desired.lock().iter().cloned().collect()
    }
}
