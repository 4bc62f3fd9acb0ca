//! Connects to a sync server and logs connection and notification activity.
//!
//! Configuration via environment (or a .env file):
//! - SYNC_WS_URL: WebSocket endpoint (default ws://127.0.0.1:8080/ws)
//! - SYNC_USER_ID: user channel to subscribe (default dev-user)
//! - SYNC_WORKSPACE_ID: optional workspace to join on startup

use std::sync::Arc;
use std::time::Duration;
use syncwire::{
    ConnectionEvent, NoOpNotifier, SilentChime, SyncClient, SyncClientConfig, UnavailableSessions,
};
use tracing::{info, warn};
use workspace_sync::bin_common::{env_or, init_logging};

#[tokio::main]
async fn main() -> syncwire::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let url = env_or("SYNC_WS_URL", "ws://127.0.0.1:8080/ws");
    let user_id = env_or("SYNC_USER_ID", "dev-user");
    info!(%url, %user_id, "starting sync monitor");

    let client = SyncClient::new(
        SyncClientConfig::new(&url, &user_id),
        Arc::new(UnavailableSessions),
        Arc::new(syncwire::MemoryStore::new()),
        Arc::new(NoOpNotifier),
        Arc::new(SilentChime),
    );
    client.init()?;

    if let Ok(workspace_id) = std::env::var("SYNC_WORKSPACE_ID") {
        client
            .subscriptions()
            .subscribe(syncwire::ChannelKind::Workspace, &workspace_id);
        client.presence().join_workspace(&workspace_id, None);
        info!(%workspace_id, "joined workspace");
    }

    client.notifications().subscribe(|notification| {
        info!(
            id = %notification.id,
            category = ?notification.category,
            severity = ?notification.severity,
            title = %notification.title,
            "notification"
        );
    });

    let events = client.connection().events();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                client.dispose();
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                while let Ok(event) = events.try_recv() {
                    match event {
                        ConnectionEvent::Connected { reconnected } => {
                            info!(reconnected, "connected");
                        }
                        ConnectionEvent::Disconnected => info!("disconnected"),
                        ConnectionEvent::Reconnecting { attempt, delay } => {
                            info!(attempt, ?delay, "reconnecting");
                        }
                        ConnectionEvent::Failed { attempts } => {
                            warn!(attempts, "connection failed, giving up");
                            client.dispose();
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
