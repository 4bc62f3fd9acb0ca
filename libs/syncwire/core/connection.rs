//! Connection management
//!
//! Owns the single logical WebSocket connection: dialing, the status state
//! machine (`Idle → Connecting → Open → (Closing → Closed) | Reconnecting →
//! Connecting`, with `Failed` once the retry budget is spent), reconnection
//! with exponential backoff, and the FIFO outbound queue that is flushed
//! whenever the transport opens.
//!
//! `send` is fire-and-forget: frames are appended to the queue and written
//! immediately when the connection is open, or held until the next successful
//! open otherwise. Callers needing acknowledgement must correlate reply
//! frames themselves.

use crate::core::connection_state::{
    AtomicConnectionStatus, ConnectionMetrics, ConnectionStatus, MetricsSnapshot,
};
use crate::core::router::{LifecycleEvent, MessageRouter};
use crate::protocol::{self, ConnectionAck, Frame};
use crate::traits::{ExponentialBackoff, ReconnectionStrategy};
use crossbeam_channel::{unbounded, Receiver, Sender};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Connection manager configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on the backoff delay
    pub max_delay: Duration,
    /// Retry budget; exceeding it parks the manager in `Failed`
    pub max_attempts: usize,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Pull-style status events, observable via `ConnectionManager::events()`
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected { reconnected: bool },
    Disconnected,
    Reconnecting { attempt: usize, delay: Duration },
    Failed { attempts: usize },
}

#[derive(Debug)]
enum Command {
    /// Drain the outbound queue onto the open transport
    Flush,
    /// Clean close; suppresses auto-reconnect
    Disconnect,
}

struct ConnectionShared {
    config: ConnectionConfig,
    strategy: Arc<dyn ReconnectionStrategy>,
    status: Arc<AtomicConnectionStatus>,
    metrics: Arc<ConnectionMetrics>,
    outbound: Arc<Mutex<VecDeque<Frame>>>,
    connection_id: Arc<Mutex<Option<String>>>,
    event_tx: Sender<ConnectionEvent>,
}

/// Owner of the single logical transport connection
pub struct ConnectionManager {
    config: ConnectionConfig,
    strategy: Arc<dyn ReconnectionStrategy>,
    status: Arc<AtomicConnectionStatus>,
    metrics: Arc<ConnectionMetrics>,
    outbound: Arc<Mutex<VecDeque<Frame>>>,
    connection_id: Arc<Mutex<Option<String>>>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    event_tx: Sender<ConnectionEvent>,
    event_rx: Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a manager with the default exponential backoff derived from
    /// the config's delay/attempt fields
    pub fn new(config: ConnectionConfig) -> Self {
        let strategy = Arc::new(ExponentialBackoff::new(
            config.base_delay,
            config.max_delay,
            Some(config.max_attempts),
        ));
        Self::with_strategy(config, strategy)
    }

    /// Create a manager with a custom reconnection strategy
    pub fn with_strategy(config: ConnectionConfig, strategy: Arc<dyn ReconnectionStrategy>) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            config,
            strategy,
            status: Arc::new(AtomicConnectionStatus::new(ConnectionStatus::Idle)),
            metrics: Arc::new(ConnectionMetrics::new()),
            outbound: Arc::new(Mutex::new(VecDeque::new())),
            connection_id: Arc::new(Mutex::new(None)),
            command_tx: Mutex::new(None),
            task: Mutex::new(None),
            event_tx,
            event_rx,
        }
    }

    /// Start (or resume) the connection loop with the given handlers
    ///
    /// Idempotent while a connection attempt or open connection exists:
    /// calling again simply returns. After a clean close or a terminal
    /// `Failed`, calling `connect` starts a fresh loop with a reset retry
    /// budget. Must be called within a tokio runtime.
    pub fn connect(&self, router: Arc<MessageRouter>) -> crate::Result<()> {
        let mut task = self.task.lock();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!(status = ?self.status.get(), "connect() while loop is live, ignoring");
                return Ok(());
            }
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.command_tx.lock() = Some(command_tx);
        self.status.set(ConnectionStatus::Connecting);

        let shared = ConnectionShared {
            config: self.config.clone(),
            strategy: Arc::clone(&self.strategy),
            status: Arc::clone(&self.status),
            metrics: Arc::clone(&self.metrics),
            outbound: Arc::clone(&self.outbound),
            connection_id: Arc::clone(&self.connection_id),
            event_tx: self.event_tx.clone(),
        };
        *task = Some(tokio::spawn(run_connection(shared, router, command_rx)));
        Ok(())
    }

    /// Clean close: sends a normal close frame, transitions to `Closed`,
    /// suppresses auto-reconnect and cancels any pending reconnect timer
    pub fn disconnect(&self) {
        let delivered = self
            .command_tx
            .lock()
            .as_ref()
            .map(|tx| tx.send(Command::Disconnect).is_ok())
            .unwrap_or(false);
        if delivered {
            self.status.set(ConnectionStatus::Closing);
        } else if self.status.get() != ConnectionStatus::Idle {
            // Loop already gone; just settle the observable state
            self.status.set(ConnectionStatus::Closed);
        }
    }

    /// Queue a frame for delivery (fire-and-forget)
    ///
    /// Written immediately when the connection is open; otherwise held in
    /// FIFO order and flushed after the next successful open.
    pub fn send(&self, kind: &str, payload: Value) {
        self.send_frame(Frame::new(kind, payload));
    }

    /// Queue an already-built frame for delivery
    pub fn send_frame(&self, frame: Frame) {
        self.outbound.lock().push_back(frame);
        if self.status.is_open() {
            if let Some(tx) = self.command_tx.lock().as_ref() {
                let _ = tx.send(Command::Flush);
            }
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Server-assigned connection id from the last `connection_ack`
    /// (diagnostics only)
    pub fn connection_id(&self) -> Option<String> {
        self.connection_id.lock().clone()
    }

    /// Number of frames waiting for the next flush
    pub fn pending_outbound(&self) -> usize {
        self.outbound.lock().len()
    }

    /// Clone of the status event receiver (crossbeam, multi-consumer)
    pub fn events(&self) -> Receiver<ConnectionEvent> {
        self.event_rx.clone()
    }

    /// Try to receive a status event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ConnectionEvent> {
        self.event_rx.try_recv().ok()
    }
}

enum CloseOutcome {
    Clean,
    Abnormal(String),
}

/// Main connection task loop: dial, drive, reschedule
async fn run_connection(
    shared: ConnectionShared,
    router: Arc<MessageRouter>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    // Retries since the last successful open; backoff attempts are 1-indexed
    let mut attempt: usize = 0;
    let mut had_session = false;

    loop {
        shared.status.set(ConnectionStatus::Connecting);

        match connect_async(shared.config.url.as_str()).await {
            Ok((ws, _)) => {
                info!(url = %shared.config.url, "connected");
                let reconnected = had_session;
                had_session = true;
                if reconnected {
                    shared.metrics.increment_reconnects();
                }
                attempt = 0;
                shared.status.set(ConnectionStatus::Open);
                let _ = shared.event_tx.send(ConnectionEvent::Connected { reconnected });
                router.dispatch_lifecycle(LifecycleEvent::Open { reconnected });

                match drive_connection(ws, &shared, &router, &mut command_rx).await {
                    CloseOutcome::Clean => {
                        info!("connection closed cleanly");
                        shared.status.set(ConnectionStatus::Closed);
                        let _ = shared.event_tx.send(ConnectionEvent::Disconnected);
                        router.dispatch_lifecycle(LifecycleEvent::Closed);
                        return;
                    }
                    CloseOutcome::Abnormal(reason) => {
                        warn!(%reason, "connection lost");
                        shared.status.set(ConnectionStatus::Reconnecting);
                        let _ = shared.event_tx.send(ConnectionEvent::Disconnected);
                        router.dispatch_lifecycle(LifecycleEvent::Lost);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to connect");
                shared.status.set(ConnectionStatus::Reconnecting);
            }
        }

        attempt += 1;
        let Some(delay) = shared.strategy.next_delay(attempt) else {
            error!(attempts = attempt - 1, "reconnection budget exhausted");
            shared.status.set(ConnectionStatus::Failed);
            let _ = shared.event_tx.send(ConnectionEvent::Failed {
                attempts: attempt - 1,
            });
            router.dispatch_lifecycle(LifecycleEvent::Failed);
            return;
        };
        info!(attempt, ?delay, "scheduling reconnect");
        let _ = shared
            .event_tx
            .send(ConnectionEvent::Reconnecting { attempt, delay });

        // Wait out the backoff, staying responsive to Disconnect
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                cmd = command_rx.recv() => match cmd {
                    // Nothing to write while the transport is down
                    Some(Command::Flush) => {}
                    Some(Command::Disconnect) | None => {
                        debug!("disconnect during reconnect wait, stopping retries");
                        shared.status.set(ConnectionStatus::Closed);
                        let _ = shared.event_tx.send(ConnectionEvent::Disconnected);
                        router.dispatch_lifecycle(LifecycleEvent::Closed);
                        return;
                    }
                }
            }
        }
    }
}

/// Drive one open connection until it closes
async fn drive_connection(
    ws: WsStream,
    shared: &ConnectionShared,
    router: &Arc<MessageRouter>,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> CloseOutcome {
    let (mut write, mut read) = ws.split();

    // Flush everything queued while we were down, in insertion order
    if let Err(reason) = flush_outbound(&mut write, shared).await {
        return CloseOutcome::Abnormal(reason);
    }

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    shared.metrics.increment_received();
                    handle_inbound(&text, shared, router);
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        return CloseOutcome::Abnormal(format!("pong failed: {}", e));
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    return CloseOutcome::Abnormal("server closed the connection".into());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return CloseOutcome::Abnormal(e.to_string()),
                None => return CloseOutcome::Abnormal("stream ended".into()),
            },
            cmd = command_rx.recv() => match cmd {
                Some(Command::Flush) => {
                    if let Err(reason) = flush_outbound(&mut write, shared).await {
                        return CloseOutcome::Abnormal(reason);
                    }
                }
                Some(Command::Disconnect) | None => {
                    let close = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    let _ = write.send(Message::Close(Some(close))).await;
                    let _ = write.close().await;
                    return CloseOutcome::Clean;
                }
            },
        }
    }
}

/// Drain the outbound queue onto the wire
///
/// Pops one frame at a time so sends arriving mid-flush join the tail of the
/// same batch; insertion order is preserved end to end.
async fn flush_outbound(write: &mut WsSink, shared: &ConnectionShared) -> Result<(), String> {
    loop {
        let frame = { shared.outbound.lock().pop_front() };
        let Some(frame) = frame else { return Ok(()) };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, kind = %frame.kind, "unserializable frame dropped");
                continue;
            }
        };
        if let Err(e) = write.send(Message::Text(text)).await {
            // Keep the frame for the next open; queued frames are never lost
            shared.outbound.lock().push_front(frame);
            return Err(e.to_string());
        }
        shared.metrics.increment_sent();
    }
}

/// Parse one inbound text frame and hand it to the router
///
/// Parse failures are logged and dropped; nothing here may panic into the
/// transport loop. `connection_ack` is absorbed at this level: the id is
/// stored for diagnostics and has no delivery semantics.
fn handle_inbound(text: &str, shared: &ConnectionShared, router: &MessageRouter) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "dropping unparseable frame");
            return;
        }
    };
    if frame.kind == protocol::CONNECTION_ACK {
        match serde_json::from_value::<ConnectionAck>(frame.payload.clone()) {
            Ok(ack) => {
                debug!(connection_id = %ack.connection_id, "connection acknowledged");
                *shared.connection_id.lock() = Some(ack.connection_id);
            }
            Err(e) => warn!(error = %e, "malformed connection_ack"),
        }
        return;
    }
    router.dispatch_frame(&frame);
}
