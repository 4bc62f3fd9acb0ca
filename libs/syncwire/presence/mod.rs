//! Presence tracking
//!
//! Local side: a pure function of elapsed inactivity. Any activity signal
//! stamps `last_activity` and forces `active`; a periodic evaluator (30s
//! default) demotes to `idle` after 2 minutes and `away` after 10. Losing
//! visibility is an immediate, activity-independent transition to `away`;
//! regaining it counts as a fresh activity signal. Each transition that
//! actually changes status broadcasts exactly one presence frame per joined
//! workspace.
//!
//! Remote side: per-workspace directories mirrored from server frames.
//! Individual presence frames update one entry; roster frames replace the
//! whole directory. Stale-entry pruning is left to consumers.

use crate::core::connection::ConnectionManager;
use crate::core::connection_state::ConnectionStatus;
use crate::protocol::{self, CursorPosition, PresenceRecord, PresenceStatus, Roster};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Presence evaluator configuration
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// How often elapsed inactivity is re-evaluated
    pub evaluate_interval: Duration,
    /// Inactivity threshold for `idle`
    pub idle_after: Duration,
    /// Inactivity threshold for `away`
    pub away_after: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            evaluate_interval: Duration::from_secs(30),
            idle_after: Duration::from_secs(120),
            away_after: Duration::from_secs(600),
        }
    }
}

struct LocalState {
    status: PresenceStatus,
    last_activity: Instant,
    hidden: bool,
    /// Set when a broadcast could not go out (connection down); the next
    /// evaluator tick retries instead of running a separate retry loop
    pending_send: bool,
    session_id: Option<String>,
}

/// Maintains local activity state and remote presence directories
pub struct PresenceTracker {
    conn: Arc<ConnectionManager>,
    config: PresenceConfig,
    local: Mutex<LocalState>,
    workspaces: Mutex<BTreeSet<String>>,
    remote: Mutex<HashMap<String, HashMap<String, PresenceRecord>>>,
    evaluator: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(conn: Arc<ConnectionManager>, config: PresenceConfig) -> Self {
        Self {
            conn,
            config,
            local: Mutex::new(LocalState {
                status: PresenceStatus::Active,
                last_activity: Instant::now(),
                hidden: false,
                pending_send: false,
                session_id: None,
            }),
            workspaces: Mutex::new(BTreeSet::new()),
            remote: Mutex::new(HashMap::new()),
            evaluator: Mutex::new(None),
        }
    }

    /// Spawn the periodic evaluator; replaces any previous one
    pub fn start(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        let interval = self.config.evaluate_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately once; skip that tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.evaluate();
            }
        });
        if let Some(old) = self.evaluator.lock().replace(handle) {
            old.abort();
        }
    }

    /// Cancel the evaluator timer
    pub fn stop(&self) {
        if let Some(handle) = self.evaluator.lock().take() {
            handle.abort();
        }
    }

    /// Begin participating in a workspace; announces the current status
    pub fn join_workspace(&self, workspace_id: &str, session_id: Option<&str>) {
        self.workspaces.lock().insert(workspace_id.to_string());
        if let Some(session_id) = session_id {
            self.local.lock().session_id = Some(session_id.to_string());
        }
        let status = self.local.lock().status;
        self.broadcast_status(status);
    }

    /// Stop participating; evicts the remote directory for the workspace
    pub fn leave_workspace(&self, workspace_id: &str) {
        self.workspaces.lock().remove(workspace_id);
        self.remote.lock().remove(workspace_id);
    }

    /// A user-interaction signal (pointer/keyboard/touch/scroll)
    pub fn record_activity(&self) {
        let send = {
            let mut local = self.local.lock();
            local.last_activity = Instant::now();
            if local.hidden {
                // Hidden views stay away regardless of input
                return;
            }
            if local.status != PresenceStatus::Active {
                local.status = PresenceStatus::Active;
                true
            } else {
                false
            }
        };
        if send {
            self.broadcast_status(PresenceStatus::Active);
        }
    }

    /// The view was hidden or became visible again
    pub fn set_visibility(&self, visible: bool) {
        if visible {
            self.local.lock().hidden = false;
            self.record_activity();
            return;
        }
        let send = {
            let mut local = self.local.lock();
            local.hidden = true;
            if local.status != PresenceStatus::Away {
                local.status = PresenceStatus::Away;
                true
            } else {
                false
            }
        };
        if send {
            self.broadcast_status(PresenceStatus::Away);
        }
    }

    /// One evaluator tick: recompute status from elapsed inactivity
    ///
    /// Returns the new status when a transition happened, `None` otherwise.
    pub fn evaluate(&self) -> Option<PresenceStatus> {
        let (transition, retry) = {
            let mut local = self.local.lock();
            let target = if local.hidden {
                PresenceStatus::Away
            } else {
                let elapsed = local.last_activity.elapsed();
                if elapsed >= self.config.away_after {
                    PresenceStatus::Away
                } else if elapsed >= self.config.idle_after {
                    PresenceStatus::Idle
                } else {
                    PresenceStatus::Active
                }
            };
            if target != local.status {
                local.status = target;
                (Some(target), false)
            } else {
                (None, local.pending_send)
            }
        };

        if let Some(status) = transition {
            debug!(?status, "presence transition");
            self.broadcast_status(status);
        } else if retry {
            // A previous broadcast never made it out; try again this tick
            let status = self.local.lock().status;
            self.broadcast_status(status);
        }
        transition
    }

    /// Current local status
    pub fn status(&self) -> PresenceStatus {
        self.local.lock().status
    }

    /// Re-send the current status to every joined workspace
    ///
    /// Called by the composition root on every transition into `Open` so
    /// peers never see a stale state until the next evaluator tick.
    pub fn rebroadcast(&self) {
        let status = self.local.lock().status;
        self.broadcast_status(status);
    }

    fn broadcast_status(&self, status: PresenceStatus) {
        if self.conn.status() != ConnectionStatus::Open {
            self.local.lock().pending_send = true;
            return;
        }
        let session_id = self.local.lock().session_id.clone();
        for workspace_id in self.workspaces.lock().iter() {
            self.conn.send_frame(protocol::presence_frame(
                workspace_id,
                session_id.as_deref(),
                status,
            ));
        }
        self.local.lock().pending_send = false;
    }

    /// Broadcast this client's cursor position within a workspace
    pub fn broadcast_cursor(&self, workspace_id: &str, cursor: CursorPosition) {
        if self.conn.status() != ConnectionStatus::Open {
            // Cursor positions are ephemeral; never queue them
            return;
        }
        self.conn
            .send_frame(protocol::cursor_frame(workspace_id, &cursor));
    }

    /// Apply an inbound presence frame to the remote directory
    pub fn apply_update(&self, record: PresenceRecord) {
        if !self.workspaces.lock().contains(&record.workspace_id) {
            warn!(workspace = %record.workspace_id, "presence update for unjoined workspace, dropping");
            return;
        }
        self.remote
            .lock()
            .entry(record.workspace_id.clone())
            .or_default()
            .insert(record.user_id.clone(), record);
    }

    /// Replace a workspace's entire remote directory from a roster frame
    pub fn apply_roster(&self, roster: Roster) {
        let directory: HashMap<String, PresenceRecord> = roster
            .active_users
            .into_iter()
            .map(|record| (record.user_id.clone(), record))
            .collect();
        self.remote.lock().insert(roster.workspace_id, directory);
    }

    /// Snapshot of a workspace's remote presence directory
    pub fn workspace_presence(&self, workspace_id: &str) -> Vec<PresenceRecord> {
        self.remote
            .lock()
            .get(workspace_id)
            .map(|dir| dir.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::ConnectionConfig;

    fn tracker() -> Arc<PresenceTracker> {
        let conn = Arc::new(ConnectionManager::new(ConnectionConfig::new(
            "ws://127.0.0.1:1",
        )));
        Arc::new(PresenceTracker::new(conn, PresenceConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn idle_transition_happens_exactly_once() {
        let tracker = tracker();
        tracker.record_activity();

        tokio::time::advance(Duration::from_secs(130)).await;
        assert_eq!(tracker.evaluate(), Some(PresenceStatus::Idle));
        // Next tick: still idle, no new transition
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(tracker.evaluate(), None);
        assert_eq!(tracker.status(), PresenceStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn long_inactivity_goes_away() {
        let tracker = tracker();
        tracker.record_activity();

        tokio::time::advance(Duration::from_secs(605)).await;
        assert_eq!(tracker.evaluate(), Some(PresenceStatus::Away));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_to_active_immediately() {
        let tracker = tracker();
        tokio::time::advance(Duration::from_secs(700)).await;
        tracker.evaluate();
        assert_eq!(tracker.status(), PresenceStatus::Away);

        tracker.record_activity();
        assert_eq!(tracker.status(), PresenceStatus::Active);
        // The evaluator agrees and does not re-transition
        assert_eq!(tracker.evaluate(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_loss_forces_away_and_pins_it() {
        let tracker = tracker();
        tracker.set_visibility(false);
        assert_eq!(tracker.status(), PresenceStatus::Away);

        // Input while hidden does not resurrect the status
        tracker.record_activity();
        assert_eq!(tracker.status(), PresenceStatus::Away);
        assert_eq!(tracker.evaluate(), None);

        tracker.set_visibility(true);
        assert_eq!(tracker.status(), PresenceStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_broadcast_is_retried_on_the_next_tick() {
        let tracker = tracker();
        tracker.join_workspace("ws-1", None);
        tokio::time::advance(Duration::from_secs(130)).await;
        // Connection is Idle, so this broadcast is deferred
        assert_eq!(tracker.evaluate(), Some(PresenceStatus::Idle));
        assert!(tracker.local.lock().pending_send);
        assert_eq!(tracker.conn.pending_outbound(), 0);

        // Still deferred while the connection is down
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(tracker.evaluate(), None);
        assert!(tracker.local.lock().pending_send);
    }

    #[tokio::test]
    async fn roster_replaces_the_whole_directory() {
        let tracker = tracker();
        tracker.join_workspace("ws-1", None);
        tracker.apply_update(PresenceRecord {
            user_id: "u-old".into(),
            workspace_id: "ws-1".into(),
            status: PresenceStatus::Active,
            last_seen: 1,
            session_id: None,
        });
        assert_eq!(tracker.workspace_presence("ws-1").len(), 1);

        tracker.apply_roster(Roster {
            workspace_id: "ws-1".into(),
            total_users: 2,
            active_users: vec![
                PresenceRecord {
                    user_id: "u-1".into(),
                    workspace_id: "ws-1".into(),
                    status: PresenceStatus::Active,
                    last_seen: 2,
                    session_id: None,
                },
                PresenceRecord {
                    user_id: "u-2".into(),
                    workspace_id: "ws-1".into(),
                    status: PresenceStatus::Idle,
                    last_seen: 2,
                    session_id: None,
                },
            ],
        });
        let directory = tracker.workspace_presence("ws-1");
        assert_eq!(directory.len(), 2);
        assert!(directory.iter().all(|r| r.user_id != "u-old"));
    }

    #[tokio::test]
    async fn leaving_a_workspace_evicts_its_directory() {
        let tracker = tracker();
        tracker.join_workspace("ws-1", None);
        tracker.apply_update(PresenceRecord {
            user_id: "u-1".into(),
            workspace_id: "ws-1".into(),
            status: PresenceStatus::Active,
            last_seen: 1,
            session_id: None,
        });
        tracker.leave_workspace("ws-1");
        assert!(tracker.workspace_presence("ws-1").is_empty());

        // Updates for unjoined workspaces are ignored
        tracker.apply_update(PresenceRecord {
            user_id: "u-1".into(),
            workspace_id: "ws-1".into(),
            status: PresenceStatus::Active,
            last_seen: 2,
            session_id: None,
        });
        assert!(tracker.workspace_presence("ws-1").is_empty());
    }
}
