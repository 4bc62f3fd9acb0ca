//! # SyncWire
//!
//! The real-time synchronization layer that keeps a client's view of remote
//! workspace and session state consistent over an unreliable network.
//!
//! ## Features
//!
//! - **Single multiplexed connection**: one WebSocket carries every channel,
//!   with automatic reconnection and exponential backoff
//! - **Ordered outbound queue**: frames sent while offline are flushed FIFO
//!   on the next successful open (at-least-once delivery)
//! - **Subscription replay**: the desired channel set is replayed after every
//!   reconnect, independently of how it was built up
//! - **Presence state machine**: local activity detection with idle/away
//!   thresholds, plus mirrored remote presence directories
//! - **Bounded readiness polling**: provisioned sessions are polled until
//!   usable, never indefinitely
//! - **Notification fan-out**: routed protocol events become deduplicated,
//!   severity-gated, persisted user-facing notifications

pub mod traits;
pub mod protocol;
pub mod core;
pub mod presence;
pub mod readiness;
pub mod notify;
pub mod client;

// Re-export all traits
pub use traits::*;

// Re-export core functionality
pub use core::{
    connection::{ConnectionConfig, ConnectionEvent, ConnectionManager},
    connection_state::{AtomicConnectionStatus, ConnectionMetrics, ConnectionStatus, MetricsSnapshot},
    router::{HandlerUpdate, LifecycleEvent, MessageRouter},
    subscriptions::SubscriptionRegistry,
};

pub use protocol::{ChannelKind, Frame, InboundEvent, PresenceRecord, PresenceStatus};
pub use presence::{PresenceConfig, PresenceTracker};
pub use readiness::{ReadinessConfig, SessionReadinessMonitor};
pub use notify::{
    Category, Notification, NotificationCenter, NotificationSettings, NotifyOptions, Severity,
    SettingsUpdate,
};
pub use client::{SyncClient, SyncClientConfig};

/// Type alias for Result with SyncError
pub type Result<T> = std::result::Result<T, traits::SyncError>;
