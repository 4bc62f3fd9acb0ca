//! Common test utilities for syncwire integration tests

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Notify};

/// A mock sync server: accepts WebSocket connections, acks each one,
/// records every text frame it receives, and can push frames to (or drop)
/// all connected clients.
pub struct MockSyncServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    outbound: broadcast::Sender<String>,
    kick: Arc<Notify>,
    shutdown: Arc<Notify>,
    connections: Arc<AtomicUsize>,
}

impl MockSyncServer {
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    /// Start on a specific address (for tests that pre-reserve a port)
    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let (outbound, _) = broadcast::channel(64);
        let kick = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_received = Arc::clone(&received);
        let accept_outbound = outbound.clone();
        let accept_kick = Arc::clone(&kick);
        let accept_shutdown = Arc::clone(&shutdown);
        let accept_connections = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { break };
                        let n = accept_connections.fetch_add(1, Ordering::SeqCst) + 1;
                        let received = Arc::clone(&accept_received);
                        let outbound = accept_outbound.subscribe();
                        let kick = Arc::clone(&accept_kick);
                        tokio::spawn(async move {
                            handle_connection(stream, n, received, outbound, kick).await;
                        });
                    }
                    _ = accept_shutdown.notified() => break,
                }
            }
        });

        Self {
            addr,
            received,
            outbound,
            kick,
            shutdown,
            connections,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// All text frames received so far, across every connection
    pub fn received_frames(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    /// Received frames of one wire type, decoded as JSON
    pub fn received_of_kind(&self, kind: &str) -> Vec<serde_json::Value> {
        self.received
            .lock()
            .iter()
            .filter_map(|text| serde_json::from_str::<serde_json::Value>(text).ok())
            .filter(|v| v["type"] == kind)
            .collect()
    }

    /// Push a raw text frame to every connected client
    pub fn push(&self, text: String) {
        let _ = self.outbound.send(text);
    }

    /// Drop every live connection without a close handshake
    pub fn drop_connections(&self) {
        self.kick.notify_waiters();
    }

    /// Total connections accepted since start
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
        self.kick.notify_waiters();
    }
}

impl Drop for MockSyncServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    n: usize,
    received: Arc<Mutex<Vec<String>>>,
    mut outbound: broadcast::Receiver<String>,
    kick: Arc<Notify>,
) {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    let (mut write, mut read) = ws_stream.split();

    // Every connection is acknowledged with a server-assigned id
    let ack = serde_json::json!({
        "type": "connection_ack",
        "payload": { "connectionId": format!("conn-{}", n) },
        "timestamp": 0
    });
    if write.send(Message::Text(ack.to_string())).await.is_err() {
        return;
    }

    let kicked = kick.notified();
    tokio::pin!(kicked);

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => received.lock().push(text),
                Some(Ok(Message::Ping(data))) => {
                    if write.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            frame = outbound.recv() => {
                let Ok(text) = frame else { break };
                if write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            // Dropped abruptly: no close handshake, the client sees the
            // stream end
            _ = &mut kicked => break,
        }
    }
}

/// Poll a condition until it holds or the timeout elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
