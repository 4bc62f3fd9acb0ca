//! Integration tests for reconnection behavior against a mock sync server

mod common;

use common::{wait_until, MockSyncServer};
use std::sync::Arc;
use std::time::Duration;
use syncwire::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionStatus, MessageRouter,
};

fn fast_config(url: String) -> ConnectionConfig {
    ConnectionConfig {
        url,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        max_attempts: 5,
    }
}

#[tokio::test]
async fn dropped_connection_reconnects_automatically() {
    let server = MockSyncServer::start().await;
    let manager = Arc::new(ConnectionManager::new(fast_config(server.ws_url())));
    manager.connect(Arc::new(MessageRouter::new())).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            manager.status() == ConnectionStatus::Open
        })
        .await
    );

    server.drop_connections();
    assert!(
        wait_until(Duration::from_secs(3), || {
            manager.metrics().reconnects >= 1 && manager.status() == ConnectionStatus::Open
        })
        .await
    );
    assert_eq!(server.connection_count(), 2);

    // Event stream: Connected(false), Disconnected, Reconnecting..., Connected(true)
    let mut saw_initial = false;
    let mut saw_disconnect = false;
    let mut saw_reconnected = false;
    while let Some(event) = manager.try_recv_event() {
        match event {
            ConnectionEvent::Connected { reconnected: false } => saw_initial = true,
            ConnectionEvent::Disconnected => saw_disconnect = true,
            ConnectionEvent::Connected { reconnected: true } => saw_reconnected = true,
            _ => {}
        }
    }
    assert!(saw_initial && saw_disconnect && saw_reconnected);
}

#[tokio::test]
async fn queued_frames_survive_a_drop_and_flush_after_reopen() {
    let server = MockSyncServer::start().await;
    let manager = Arc::new(ConnectionManager::new(fast_config(server.ws_url())));
    manager.connect(Arc::new(MessageRouter::new())).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            manager.status() == ConnectionStatus::Open
        })
        .await
    );

    server.drop_connections();
    assert!(
        wait_until(Duration::from_secs(2), || {
            manager.status() != ConnectionStatus::Open
        })
        .await
    );

    // Queued while down; must arrive after the reopen
    manager.send(
        "subscribe_workspace",
        serde_json::json!({ "workspaceId": "ws-1" }),
    );
    assert!(
        wait_until(Duration::from_secs(3), || {
            !server.received_of_kind("subscribe_workspace").is_empty()
        })
        .await
    );
    let frames = server.received_of_kind("subscribe_workspace");
    assert_eq!(frames[0]["payload"]["workspaceId"], "ws-1");
}

#[tokio::test]
async fn exhausted_retry_budget_parks_in_failed() {
    // Nothing is listening on this port
    let manager = Arc::new(ConnectionManager::new(ConnectionConfig {
        url: "ws://127.0.0.1:9".to_string(),
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_attempts: 2,
    }));
    manager.connect(Arc::new(MessageRouter::new())).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            manager.status() == ConnectionStatus::Failed
        })
        .await
    );

    let mut failed_attempts = None;
    while let Some(event) = manager.try_recv_event() {
        if let ConnectionEvent::Failed { attempts } = event {
            failed_attempts = Some(attempts);
        }
    }
    assert_eq!(failed_attempts, Some(2));
}

#[tokio::test]
async fn connect_after_failed_resets_the_budget() {
    // Reserve a port with nothing listening on it yet
    let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let manager = Arc::new(ConnectionManager::new(ConnectionConfig {
        url: format!("ws://{}", addr),
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        max_attempts: 2,
    }));
    manager.connect(Arc::new(MessageRouter::new())).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            manager.status() == ConnectionStatus::Failed
        })
        .await
    );

    // Bring the server up and connect() again: fresh loop, fresh budget
    let _server = MockSyncServer::start_on(addr).await;
    manager.connect(Arc::new(MessageRouter::new())).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            manager.status() == ConnectionStatus::Open
        })
        .await
    );
}

#[tokio::test]
async fn disconnect_during_backoff_cancels_retries() {
    let manager = Arc::new(ConnectionManager::new(ConnectionConfig {
        url: "ws://127.0.0.1:9".to_string(),
        base_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(30),
        max_attempts: 5,
    }));
    manager.connect(Arc::new(MessageRouter::new())).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            manager.status() == ConnectionStatus::Reconnecting
        })
        .await
    );

    // The 30s backoff sleep is interrupted immediately
    manager.disconnect();
    assert!(
        wait_until(Duration::from_secs(2), || {
            manager.status() == ConnectionStatus::Closed
        })
        .await
    );
}
