//! Connection core
//!
//! The single logical connection, the typed message router, and the
//! subscription registry that replays desired channels whenever the
//! connection opens.

pub mod connection;
pub mod connection_state;
pub mod router;
pub mod subscriptions;

pub use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager};
pub use connection_state::{
    AtomicConnectionStatus, ConnectionMetrics, ConnectionStatus, MetricsSnapshot,
};
pub use router::{HandlerUpdate, LifecycleEvent, MessageRouter};
pub use subscriptions::SubscriptionRegistry;
