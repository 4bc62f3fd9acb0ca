//! Session readiness monitoring
//!
//! Waits for asynchronously-provisioned sessions to become usable without
//! polling indefinitely. Monitoring is a bounded poll: every 10 seconds the
//! session is re-queried, for at most 30 attempts (~5 minutes). Hitting the
//! attempt cap is not an error; the resource may still converge and be
//! observed fresh on the next `ensure_active_session` call.

use crate::traits::sessions::{SessionInfo, SessionQueryApi, SessionState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Readiness poller configuration
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Delay between poll attempts
    pub poll_interval: Duration,
    /// Attempt cap before the poll gives up (cache entry retained)
    pub max_polls: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_polls: 30,
        }
    }
}

type MonitorKey = (String, String);

struct MonitorEntry {
    generation: u64,
    handle: tokio::task::JoinHandle<()>,
}

/// Polls the Session Query API until a provisioned session is usable
pub struct SessionReadinessMonitor {
    api: Arc<dyn SessionQueryApi>,
    config: ReadinessConfig,
    /// workspace id -> last observed ready session id
    ready_cache: Mutex<HashMap<String, String>>,
    monitors: Mutex<HashMap<MonitorKey, MonitorEntry>>,
    generations: AtomicU64,
}

impl SessionReadinessMonitor {
    pub fn new(api: Arc<dyn SessionQueryApi>, config: ReadinessConfig) -> Self {
        Self {
            api,
            config,
            ready_cache: Mutex::new(HashMap::new()),
            monitors: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Find or provision a usable session for the workspace
    ///
    /// 1. A cached ready session is re-verified and returned if still ready.
    /// 2. An already-running session is cached and returned.
    /// 3. A mid-provisioning session is returned as pending, with monitoring.
    /// 4. Otherwise a new session is created, cached, and monitored.
    pub async fn ensure_active_session(
        self: &Arc<Self>,
        workspace_id: &str,
    ) -> crate::Result<SessionInfo> {
        let cached = self.ready_cache.lock().get(workspace_id).cloned();
        if let Some(session_id) = cached {
            match self.api.get_session(workspace_id, &session_id).await {
                Ok(session) if session.is_ready() => {
                    debug!(workspace_id, session_id = %session.id, "cached session still ready");
                    return Ok(session);
                }
                Ok(_) | Err(_) => {
                    debug!(workspace_id, %session_id, "cached session no longer ready, dropping");
                    self.ready_cache.lock().remove(workspace_id);
                }
            }
        }

        let sessions = self.api.list_sessions(workspace_id).await?;
        if let Some(session) = sessions.iter().find(|s| s.is_ready()) {
            self.ready_cache
                .lock()
                .insert(workspace_id.to_string(), session.id.clone());
            return Ok(session.clone());
        }
        if let Some(session) = sessions
            .iter()
            .find(|s| s.state == SessionState::Creating)
        {
            info!(workspace_id, session_id = %session.id, "session mid-provisioning, monitoring");
            self.start_monitor(workspace_id, &session.id);
            return Ok(session.clone());
        }

        let name = format!("{}-session", workspace_id);
        let session = self.api.create_session(workspace_id, &name).await?;
        info!(workspace_id, session_id = %session.id, "created session, monitoring");
        self.ready_cache
            .lock()
            .insert(workspace_id.to_string(), session.id.clone());
        self.start_monitor(workspace_id, &session.id);
        Ok(session)
    }

    /// Health of one session as a status string, never an error
    pub async fn get_session_health(&self, workspace_id: &str, session_id: &str) -> String {
        match self.api.get_session(workspace_id, session_id).await {
            Ok(session) => match session.state {
                SessionState::Running => "ready".to_string(),
                SessionState::Creating => "provisioning".to_string(),
                SessionState::Stopped => "stopped".to_string(),
                SessionState::Error => "error".to_string(),
            },
            Err(e) => format!("unavailable: {}", e),
        }
    }

    /// Start a bounded poll for one (workspace, session) pair
    ///
    /// At most one monitor runs per pair; starting another cancels and
    /// replaces the existing one.
    pub fn start_monitor(self: &Arc<Self>, workspace_id: &str, session_id: &str) {
        let key: MonitorKey = (workspace_id.to_string(), session_id.to_string());
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;

        let monitor = Arc::clone(self);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            monitor.poll_session(task_key, generation).await;
        });

        let mut monitors = self.monitors.lock();
        if let Some(previous) = monitors.insert(
            key,
            MonitorEntry {
                generation,
                handle,
            },
        ) {
            previous.handle.abort();
        }
    }

    async fn poll_session(self: Arc<Self>, key: MonitorKey, generation: u64) {
        let (workspace_id, session_id) = &key;
        for attempt in 1..=self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval).await;
            match self.api.get_session(workspace_id, session_id).await {
                Ok(session) if session.is_ready() => {
                    info!(workspace_id, session_id, attempt, "session became ready");
                    self.ready_cache
                        .lock()
                        .insert(workspace_id.clone(), session_id.clone());
                    self.finish(&key, generation);
                    return;
                }
                Ok(session) if session.state == SessionState::Error => {
                    warn!(workspace_id, session_id, attempt, "session entered error state");
                    self.drop_cached(workspace_id, session_id);
                    self.finish(&key, generation);
                    return;
                }
                Ok(_) => {
                    debug!(workspace_id, session_id, attempt, "session not ready yet");
                }
                Err(e) => {
                    warn!(workspace_id, session_id, attempt, error = %e, "session query failed, stopping monitor");
                    self.drop_cached(workspace_id, session_id);
                    self.finish(&key, generation);
                    return;
                }
            }
        }
        // Attempt cap reached: stop polling but keep the cache entry; the
        // next ensure_active_session call re-evaluates from scratch
        info!(
            workspace_id,
            session_id,
            attempts = self.config.max_polls,
            "readiness poll timed out"
        );
        self.finish(&key, generation);
    }

    fn drop_cached(&self, workspace_id: &str, session_id: &str) {
        let mut cache = self.ready_cache.lock();
        if cache.get(workspace_id).map(String::as_str) == Some(session_id) {
            cache.remove(workspace_id);
        }
    }

    /// Remove our own monitor entry, unless a replacement took the slot
    fn finish(&self, key: &MonitorKey, generation: u64) {
        let mut monitors = self.monitors.lock();
        if monitors
            .get(key)
            .map(|entry| entry.generation == generation)
            .unwrap_or(false)
        {
            monitors.remove(key);
        }
    }

    /// Cancel every monitor for a workspace and clear its cache entry
    pub fn cleanup(&self, workspace_id: &str) {
        let mut monitors = self.monitors.lock();
        monitors.retain(|(ws, _), entry| {
            if ws == workspace_id {
                entry.handle.abort();
                false
            } else {
                true
            }
        });
        self.ready_cache.lock().remove(workspace_id);
    }

    /// Cancel all monitors process-wide
    pub fn destroy(&self) {
        let mut monitors = self.monitors.lock();
        for (_, entry) in monitors.drain() {
            entry.handle.abort();
        }
        self.ready_cache.lock().clear();
    }

    /// Cached ready session id for a workspace, if any
    pub fn cached_session(&self, workspace_id: &str) -> Option<String> {
        self.ready_cache.lock().get(workspace_id).cloned()
    }

    /// Number of live monitors (bounded by cancel-and-replace and cleanup)
    pub fn active_monitors(&self) -> usize {
        self.monitors.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::error::SyncError;
    use async_trait::async_trait;

    /// Scripted session API: each get_session call pops the next state;
    /// the last state repeats once the script is exhausted.
    struct ScriptedApi {
        listing: Mutex<Vec<SessionInfo>>,
        script: Mutex<Vec<Result<SessionState, ()>>>,
        get_calls: AtomicU64,
        create_calls: AtomicU64,
    }

    impl ScriptedApi {
        fn new(listing: Vec<SessionInfo>, script: Vec<Result<SessionState, ()>>) -> Arc<Self> {
            Arc::new(Self {
                listing: Mutex::new(listing),
                script: Mutex::new(script),
                get_calls: AtomicU64::new(0),
                create_calls: AtomicU64::new(0),
            })
        }

        fn session(id: &str, state: SessionState) -> SessionInfo {
            SessionInfo {
                id: id.to_string(),
                name: format!("{}-name", id),
                state,
            }
        }
    }

    #[async_trait]
    impl SessionQueryApi for ScriptedApi {
        async fn list_sessions(&self, _workspace_id: &str) -> crate::Result<Vec<SessionInfo>> {
            Ok(self.listing.lock().clone())
        }

        async fn create_session(
            &self,
            _workspace_id: &str,
            name: &str,
        ) -> crate::Result<SessionInfo> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SessionInfo {
                id: "s-new".to_string(),
                name: name.to_string(),
                state: SessionState::Creating,
            })
        }

        async fn get_session(
            &self,
            _workspace_id: &str,
            session_id: &str,
        ) -> crate::Result<SessionInfo> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock();
            let next = if script.len() > 1 {
                script.remove(0)
            } else {
                script.first().cloned().unwrap_or(Ok(SessionState::Creating))
            };
            match next {
                Ok(state) => Ok(Self::session(session_id, state)),
                Err(()) => Err(SyncError::Query("lookup failed".into())),
            }
        }
    }

    fn monitor(api: Arc<ScriptedApi>) -> Arc<SessionReadinessMonitor> {
        Arc::new(SessionReadinessMonitor::new(
            api,
            ReadinessConfig::default(),
        ))
    }

    async fn settle(monitor: &Arc<SessionReadinessMonitor>) {
        // Paused clock: sleeps auto-advance once the runtime is idle, so the
        // poll loop runs to completion well before this wall of fake time
        let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
        while monitor.active_monitors() > 0 && tokio::time::Instant::now() < deadline {
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn running_session_is_returned_and_cached_without_polling() {
        let api = ScriptedApi::new(
            vec![ScriptedApi::session("s-1", SessionState::Running)],
            vec![Ok(SessionState::Running)],
        );
        let monitor = monitor(Arc::clone(&api));

        let session = monitor.ensure_active_session("ws-1").await.unwrap();
        assert_eq!(session.id, "s-1");
        assert_eq!(monitor.cached_session("ws-1").as_deref(), Some("s-1"));
        assert_eq!(monitor.active_monitors(), 0);
        assert_eq!(api.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn provisioning_session_is_monitored_until_ready() {
        let api = ScriptedApi::new(
            vec![ScriptedApi::session("s-1", SessionState::Creating)],
            vec![
                Ok(SessionState::Creating),
                Ok(SessionState::Creating),
                Ok(SessionState::Running),
            ],
        );
        let monitor = monitor(Arc::clone(&api));

        let session = monitor.ensure_active_session("ws-1").await.unwrap();
        assert_eq!(session.state, SessionState::Creating);
        assert_eq!(monitor.active_monitors(), 1);

        settle(&monitor).await;
        // Ready on poll attempt 3: exactly three queries, no attempt 4
        assert_eq!(api.get_calls.load(Ordering::SeqCst), 3);
        assert_eq!(monitor.cached_session("ws-1").as_deref(), Some("s-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn error_state_stops_the_monitor_and_drops_the_cache() {
        let api = ScriptedApi::new(vec![], vec![Ok(SessionState::Error)]);
        let monitor = monitor(Arc::clone(&api));

        let session = monitor.ensure_active_session("ws-1").await.unwrap();
        assert_eq!(session.id, "s-new");
        assert_eq!(monitor.cached_session("ws-1").as_deref(), Some("s-new"));

        settle(&monitor).await;
        assert_eq!(monitor.cached_session("ws-1"), None);
        assert_eq!(api.get_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn query_failure_stops_the_monitor_and_drops_the_cache() {
        let api = ScriptedApi::new(vec![], vec![Err(())]);
        let monitor = monitor(Arc::clone(&api));

        monitor.ensure_active_session("ws-1").await.unwrap();
        settle(&monitor).await;
        assert_eq!(monitor.cached_session("ws-1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_after_thirty_attempts_retains_the_cache_entry() {
        let api = ScriptedApi::new(vec![], vec![Ok(SessionState::Creating)]);
        let monitor = monitor(Arc::clone(&api));

        monitor.ensure_active_session("ws-1").await.unwrap();
        settle(&monitor).await;
        assert_eq!(api.get_calls.load(Ordering::SeqCst), 30);
        assert_eq!(monitor.cached_session("ws-1").as_deref(), Some("s-new"));
        assert_eq!(monitor.active_monitors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_a_monitor_replaces_the_existing_one() {
        let api = ScriptedApi::new(vec![], vec![Ok(SessionState::Creating)]);
        let monitor = monitor(Arc::clone(&api));

        monitor.start_monitor("ws-1", "s-1");
        monitor.start_monitor("ws-1", "s-1");
        assert_eq!(monitor.active_monitors(), 1);

        monitor.cleanup("ws-1");
        assert_eq!(monitor.active_monitors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_only_touches_the_given_workspace() {
        let api = ScriptedApi::new(vec![], vec![Ok(SessionState::Creating)]);
        let monitor = monitor(Arc::clone(&api));

        monitor.start_monitor("ws-1", "s-1");
        monitor.start_monitor("ws-2", "s-2");
        monitor.ready_cache.lock().insert("ws-1".into(), "s-1".into());
        monitor.ready_cache.lock().insert("ws-2".into(), "s-2".into());

        monitor.cleanup("ws-1");
        assert_eq!(monitor.active_monitors(), 1);
        assert_eq!(monitor.cached_session("ws-1"), None);
        assert_eq!(monitor.cached_session("ws-2").as_deref(), Some("s-2"));

        monitor.destroy();
        assert_eq!(monitor.active_monitors(), 0);
        assert_eq!(monitor.cached_session("ws-2"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cache_entry_is_dropped_and_reevaluated() {
        let api = ScriptedApi::new(
            vec![ScriptedApi::session("s-2", SessionState::Running)],
            vec![Ok(SessionState::Stopped)],
        );
        let monitor = monitor(Arc::clone(&api));
        monitor.ready_cache.lock().insert("ws-1".into(), "s-old".into());

        let session = monitor.ensure_active_session("ws-1").await.unwrap();
        assert_eq!(session.id, "s-2");
        assert_eq!(monitor.cached_session("ws-1").as_deref(), Some("s-2"));
    }
}
