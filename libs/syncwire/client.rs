//! Client composition root
//!
//! Wires the connection manager, router, subscription registry, presence
//! tracker, readiness monitor, and notification center into one facade.
//! The wiring rules live here and nowhere else: which routed events become
//! notifications, what gets replayed on reconnect, and how teardown is
//! ordered.

use crate::core::connection::{ConnectionConfig, ConnectionManager};
use crate::core::router::{HandlerUpdate, LifecycleEvent, MessageRouter};
use crate::core::subscriptions::SubscriptionRegistry;
use crate::notify::{Category, NotificationCenter, NotifyOptions, Severity};
use crate::presence::{PresenceConfig, PresenceTracker};
use crate::protocol::{ActivityNotification, AgentActivityKind, ChannelKind, WorkspaceState};
use crate::readiness::{ReadinessConfig, SessionReadinessMonitor};
use crate::traits::sessions::SessionQueryApi;
use crate::traits::sink::{ChimePlayer, DesktopNotifier};
use crate::traits::store::KeyValueStore;
use std::sync::Arc;
use tracing::info;

/// Top-level client configuration
#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    pub connection: ConnectionConfig,
    pub presence: PresenceConfig,
    pub readiness: ReadinessConfig,
    /// Owner of the user-notification channel
    pub user_id: String,
}

impl SyncClientConfig {
    pub fn new(url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            presence: PresenceConfig::default(),
            readiness: ReadinessConfig::default(),
            user_id: user_id.into(),
        }
    }
}

/// One fully-wired synchronization client
pub struct SyncClient {
    conn: Arc<ConnectionManager>,
    router: Arc<MessageRouter>,
    subscriptions: Arc<SubscriptionRegistry>,
    presence: Arc<PresenceTracker>,
    readiness: Arc<SessionReadinessMonitor>,
    notifications: Arc<NotificationCenter>,
    user_id: String,
}

impl SyncClient {
    pub fn new(
        config: SyncClientConfig,
        api: Arc<dyn SessionQueryApi>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn DesktopNotifier>,
        chime: Arc<dyn ChimePlayer>,
    ) -> Arc<Self> {
        let conn = Arc::new(ConnectionManager::new(config.connection));
        let router = Arc::new(MessageRouter::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new(Arc::clone(&conn)));
        let presence = Arc::new(PresenceTracker::new(Arc::clone(&conn), config.presence));
        let readiness = Arc::new(SessionReadinessMonitor::new(api, config.readiness));
        let notifications = Arc::new(NotificationCenter::new(store, notifier, chime));
        Arc::new(Self {
            conn,
            router,
            subscriptions,
            presence,
            readiness,
            notifications,
            user_id: config.user_id,
        })
    }

    /// Register handlers, start presence, subscribe the user channel and
    /// open the connection
    pub fn init(self: &Arc<Self>) -> crate::Result<()> {
        self.register_handlers();
        self.subscriptions
            .subscribe(ChannelKind::UserNotifications, &self.user_id);
        self.presence.start();
        self.conn.connect(Arc::clone(&self.router))?;
        info!(user_id = %self.user_id, "sync client initialized");
        Ok(())
    }

    /// Tear everything down: timers first, then the transport
    pub fn dispose(&self) {
        self.presence.stop();
        self.readiness.destroy();
        self.conn.disconnect();
        info!("sync client disposed");
    }

    fn register_handlers(self: &Arc<Self>) {
        let presence = Arc::clone(&self.presence);
        let roster_presence = Arc::clone(&self.presence);
        let activity_notifications = Arc::clone(&self.notifications);
        let status_notifications = Arc::clone(&self.notifications);
        let session_notifications = Arc::clone(&self.notifications);
        // Weak: the router outlives nothing here, and a strong ref would
        // cycle through the lifecycle slot back to self
        let lifecycle_client = Arc::downgrade(self);

        self.router.update_handlers(HandlerUpdate {
            presence: Some(Arc::new(move |record| presence.apply_update(record))),
            roster: Some(Arc::new(move |roster| roster_presence.apply_roster(roster))),
            activity: Some(Arc::new(move |activity: ActivityNotification| {
                activity_notifications.notify(
                    activity_category(&activity.kind),
                    activity.severity,
                    &activity.title,
                    &activity.message,
                    NotifyOptions {
                        workspace_id: activity.workspace_id.clone(),
                        session_id: activity.session_id.clone(),
                        auto_close: activity.auto_close,
                        // Server ids survive redelivery; reuse them for dedupe
                        dedupe_id: Some(activity.id.clone()),
                    },
                );
            })),
            workspace_status: Some(Arc::new(move |status| {
                let severity = workspace_severity(status.status);
                let message = status
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("Workspace is {:?}", status.status).to_lowercase());
                status_notifications.notify(
                    Category::Workspace,
                    severity,
                    "Workspace status",
                    &message,
                    NotifyOptions {
                        workspace_id: Some(status.workspace_id.clone()),
                        ..Default::default()
                    },
                );
            })),
            session_update: Some(Arc::new(move |update| {
                // Only the embedded agent activity surfaces to the user
                let Some(activity) = update.agent_activity else {
                    return;
                };
                let message = activity
                    .message
                    .clone()
                    .unwrap_or_else(|| "Agent activity".to_string());
                session_notifications.notify(
                    Category::Session,
                    agent_severity(activity.kind),
                    "Session update",
                    &message,
                    NotifyOptions {
                        session_id: activity.session_id.clone(),
                        ..Default::default()
                    },
                );
            })),
            lifecycle: Some(Arc::new(move |event| {
                if let Some(client) = lifecycle_client.upgrade() {
                    client.on_lifecycle(event);
                }
            })),
            ..Default::default()
        });
    }

    fn on_lifecycle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Open { reconnected } => {
                // Server-side channel state is gone after any reopen
                self.subscriptions.replay();
                self.presence.rebroadcast();
                if reconnected {
                    self.notifications.notify(
                        Category::System,
                        Severity::Success,
                        "Connection restored",
                        "Real-time sync is back",
                        NotifyOptions::default(),
                    );
                }
            }
            LifecycleEvent::Lost => {
                self.notifications.notify(
                    Category::System,
                    Severity::Warning,
                    "Connection lost",
                    "Reconnecting to the sync server",
                    NotifyOptions::default(),
                );
            }
            LifecycleEvent::Failed => {
                self.notifications.notify(
                    Category::System,
                    Severity::Error,
                    "Connection failed",
                    "Gave up reconnecting; call connect() to retry",
                    NotifyOptions::default(),
                );
            }
            LifecycleEvent::Closed => {}
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.conn
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn readiness(&self) -> &Arc<SessionReadinessMonitor> {
        &self.readiness
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }
}

fn activity_category(kind: &str) -> Category {
    match kind {
        "collaboration" => Category::Collaboration,
        k if k.starts_with("workspace") => Category::Workspace,
        k if k.starts_with("session") => Category::Session,
        _ => Category::System,
    }
}

fn workspace_severity(state: WorkspaceState) -> Severity {
    match state {
        WorkspaceState::Running => Severity::Success,
        WorkspaceState::Creating => Severity::Info,
        WorkspaceState::Stopped => Severity::Warning,
        WorkspaceState::Error => Severity::Error,
    }
}

fn agent_severity(kind: AgentActivityKind) -> Severity {
    match kind {
        AgentActivityKind::ActivityError => Severity::Error,
        AgentActivityKind::ActivityComplete => Severity::Success,
        AgentActivityKind::ActivityStart | AgentActivityKind::ActivityUpdate => Severity::Info,
    }
}
