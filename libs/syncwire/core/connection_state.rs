use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Connection status observable through `ConnectionManager::status()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never connected
    Idle,
    /// Dial in progress
    Connecting,
    /// Transport open, frames flow
    Open,
    /// Clean close requested, not yet complete
    Closing,
    /// Cleanly closed; auto-reconnect suppressed
    Closed,
    /// Lost the connection, retry scheduled
    Reconnecting,
    /// Retry budget exhausted; requires an explicit connect() to resume
    Failed,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::Idle,
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Open,
            3 => ConnectionStatus::Closing,
            4 => ConnectionStatus::Closed,
            5 => ConnectionStatus::Reconnecting,
            _ => ConnectionStatus::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionStatus::Idle => 0,
            ConnectionStatus::Connecting => 1,
            ConnectionStatus::Open => 2,
            ConnectionStatus::Closing => 3,
            ConnectionStatus::Closed => 4,
            ConnectionStatus::Reconnecting => 5,
            ConnectionStatus::Failed => 6,
        }
    }
}

/// Lock-free connection status cell
pub struct AtomicConnectionStatus(AtomicU8);

impl AtomicConnectionStatus {
    pub fn new(status: ConnectionStatus) -> Self {
        Self(AtomicU8::new(status.as_u8()))
    }

    #[inline]
    pub fn get(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, status: ConnectionStatus) {
        self.0.store(status.as_u8(), Ordering::Release);
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.get() == ConnectionStatus::Open
    }
}

/// Lock-free per-connection counters
#[derive(Default)]
pub struct ConnectionMetrics {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub reconnects: u64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
