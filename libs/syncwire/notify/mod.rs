//! Notification center
//!
//! Converts routed protocol events into deduplicated, persisted,
//! severity-gated user-facing notifications, and fans them out to any number
//! of subscribers. History is bounded (newest first, oldest evicted);
//! settings and a capped history slice are persisted best-effort on every
//! mutation. Category gating takes precedence over severity: a disabled
//! category suppresses even error notifications, though the call still
//! returns a valid id.

use crate::traits::sink::{ChimePlayer, DesktopNotifier};
use crate::traits::store::KeyValueStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

const SETTINGS_KEY: &str = "syncwire.notification_settings";
const HISTORY_KEY: &str = "syncwire.notification_history";

/// How many history entries survive a process restart
const PERSISTED_HISTORY: usize = 20;

/// Default in-memory history capacity
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Workspace,
    Session,
    Collaboration,
    System,
}

/// A user-facing notification; immutable once stored except for `read`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub category: Category,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: i64,
    pub auto_close: bool,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub enabled: bool,
    pub sound: bool,
    pub desktop: bool,
    pub workspace_events: bool,
    pub session_events: bool,
    pub collaboration_events: bool,
    pub system_events: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sound: true,
            desktop: true,
            workspace_events: true,
            session_events: true,
            collaboration_events: true,
            system_events: true,
        }
    }
}

impl NotificationSettings {
    fn category_enabled(&self, category: Category) -> bool {
        match category {
            Category::Workspace => self.workspace_events,
            Category::Session => self.session_events,
            Category::Collaboration => self.collaboration_events,
            Category::System => self.system_events,
        }
    }
}

/// Partial settings change merged by `update_settings`
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub sound: Option<bool>,
    pub desktop: Option<bool>,
    pub workspace_events: Option<bool>,
    pub session_events: Option<bool>,
    pub collaboration_events: Option<bool>,
    pub system_events: Option<bool>,
}

/// Optional fields for `notify`
#[derive(Debug, Clone, Default)]
pub struct NotifyOptions {
    pub workspace_id: Option<String>,
    pub session_id: Option<String>,
    /// When unset, everything but errors auto-closes
    pub auto_close: Option<bool>,
    /// Suppresses re-delivery when a notification with this id is already in
    /// history (at-least-once transports may replay events)
    pub dedupe_id: Option<String>,
}

type Subscriber = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Deduplicated, persisted, severity-gated notification store and fan-out
pub struct NotificationCenter {
    settings: Mutex<NotificationSettings>,
    history: Mutex<VecDeque<Notification>>,
    capacity: usize,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_token: AtomicU64,
    id_seq: AtomicU64,
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn DesktopNotifier>,
    chime: Arc<dyn ChimePlayer>,
}

impl NotificationCenter {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn DesktopNotifier>,
        chime: Arc<dyn ChimePlayer>,
    ) -> Self {
        Self::with_capacity(store, notifier, chime, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn DesktopNotifier>,
        chime: Arc<dyn ChimePlayer>,
        capacity: usize,
    ) -> Self {
        let center = Self {
            settings: Mutex::new(NotificationSettings::default()),
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            subscribers: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            id_seq: AtomicU64::new(0),
            store,
            notifier,
            chime,
        };
        center.restore();
        center
    }

    /// Construct and deliver a notification
    ///
    /// Returns the notification id even when delivery is gated off.
    pub fn notify(
        &self,
        category: Category,
        severity: Severity,
        title: &str,
        message: &str,
        opts: NotifyOptions,
    ) -> String {
        let id = opts
            .dedupe_id
            .clone()
            .unwrap_or_else(|| self.next_id());

        if opts.dedupe_id.is_some() {
            let already_known = self.history.lock().iter().any(|n| n.id == id);
            if already_known {
                debug!(%id, "duplicate notification, skipping delivery");
                return id;
            }
        }

        let settings = self.settings.lock().clone();
        if !settings.enabled || !settings.category_enabled(category) {
            debug!(?category, "notifications gated off, skipping delivery");
            return id;
        }

        // Errors stay up until explicitly dismissed
        let auto_close = severity != Severity::Error && opts.auto_close.unwrap_or(true);
        let notification = Notification {
            id: id.clone(),
            title: title.to_string(),
            message: message.to_string(),
            category,
            severity,
            workspace_id: opts.workspace_id,
            session_id: opts.session_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            auto_close,
            read: false,
        };

        {
            let mut history = self.history.lock();
            history.push_front(notification.clone());
            history.truncate(self.capacity);
        }

        if settings.desktop && self.notifier.permission_granted() {
            self.notifier.display(&notification, auto_close);
        }
        if settings.sound {
            self.chime.play(severity);
        }

        let subscribers: Vec<Subscriber> = self.subscribers.lock().values().cloned().collect();
        for subscriber in subscribers {
            // One misbehaving subscriber must not starve the rest
            if catch_unwind(AssertUnwindSafe(|| subscriber(&notification))).is_err() {
                error!("notification subscriber panicked");
            }
        }

        self.persist_history();
        id
    }

    /// Register a listener; returns a token for `unsubscribe`
    pub fn subscribe(&self, listener: impl Fn(&Notification) + Send + Sync + 'static) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(token, Arc::new(listener));
        token
    }

    pub fn unsubscribe(&self, token: u64) {
        self.subscribers.lock().remove(&token);
    }

    /// History snapshot, newest first
    pub fn get_notifications(&self) -> Vec<Notification> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.history.lock().iter().filter(|n| !n.read).count()
    }

    pub fn mark_read(&self, id: &str) {
        let mut history = self.history.lock();
        if let Some(notification) = history.iter_mut().find(|n| n.id == id) {
            notification.read = true;
        }
        drop(history);
        self.persist_history();
    }

    pub fn mark_all_read(&self) {
        for notification in self.history.lock().iter_mut() {
            notification.read = true;
        }
        self.persist_history();
    }

    /// Remove one notification from history (the sink's already-displayed
    /// notifications are untouched)
    pub fn clear_notification(&self, id: &str) {
        self.history.lock().retain(|n| n.id != id);
        self.persist_history();
    }

    pub fn clear_all(&self) {
        self.history.lock().clear();
        self.persist_history();
    }

    pub fn clear_by_category(&self, category: Category) {
        self.history.lock().retain(|n| n.category != category);
        self.persist_history();
    }

    pub fn get_settings(&self) -> NotificationSettings {
        self.settings.lock().clone()
    }

    /// Merge a partial settings change and persist the result
    pub fn update_settings(&self, update: SettingsUpdate) {
        {
            let mut settings = self.settings.lock();
            if let Some(v) = update.enabled {
                settings.enabled = v;
            }
            if let Some(v) = update.sound {
                settings.sound = v;
            }
            if let Some(v) = update.desktop {
                settings.desktop = v;
            }
            if let Some(v) = update.workspace_events {
                settings.workspace_events = v;
            }
            if let Some(v) = update.session_events {
                settings.session_events = v;
            }
            if let Some(v) = update.collaboration_events {
                settings.collaboration_events = v;
            }
            if let Some(v) = update.system_events {
                settings.system_events = v;
            }
        }
        self.persist_settings();
    }

    /// Ask the OS sink for display permission
    pub fn request_desktop_permission(&self) -> bool {
        self.notifier.request_permission()
    }

    fn next_id(&self) -> String {
        let seq = self.id_seq.fetch_add(1, Ordering::Relaxed);
        format!("n-{}-{}", chrono::Utc::now().timestamp_millis(), seq)
    }

    fn restore(&self) {
        match self.store.get(SETTINGS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<NotificationSettings>(&raw) {
                Ok(settings) => *self.settings.lock() = settings,
                Err(e) => warn!(error = %e, "stored settings unreadable, using defaults"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read stored settings"),
        }
        match self.store.get(HISTORY_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Notification>>(&raw) {
                Ok(entries) => {
                    let mut history = self.history.lock();
                    history.extend(entries);
                    history.truncate(self.capacity);
                }
                Err(e) => warn!(error = %e, "stored history unreadable, starting empty"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read stored history"),
        }
    }

    fn persist_settings(&self) {
        let settings = self.settings.lock().clone();
        match serde_json::to_string(&settings) {
            Ok(raw) => {
                if let Err(e) = self.store.set(SETTINGS_KEY, &raw) {
                    warn!(error = %e, "persisting settings failed, memory stays authoritative");
                }
            }
            Err(e) => warn!(error = %e, "settings unserializable"),
        }
    }

    fn persist_history(&self) {
        let slice: Vec<Notification> = self
            .history
            .lock()
            .iter()
            .take(PERSISTED_HISTORY)
            .cloned()
            .collect();
        match serde_json::to_string(&slice) {
            Ok(raw) => {
                if let Err(e) = self.store.set(HISTORY_KEY, &raw) {
                    warn!(error = %e, "persisting history failed, memory stays authoritative");
                }
            }
            Err(e) => warn!(error = %e, "history unserializable"),
        }
    }
}
