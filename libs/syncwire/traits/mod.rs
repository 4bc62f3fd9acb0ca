//! # SyncWire Traits
//!
//! Collaborator seams and strategies used throughout the synchronization
//! layer. Each external dependency of the core (session queries, persistent
//! storage, OS notification sink) is expressed as a trait so the core can be
//! driven entirely by fakes in tests:
//!
//! - **ReconnectionStrategy**: control reconnection timing
//! - **SessionQueryApi**: query/create asynchronously-provisioned sessions
//! - **KeyValueStore**: persistent local settings/history storage
//! - **DesktopNotifier** / **ChimePlayer**: OS-level notification surfaces

pub mod error;
pub mod reconnect;
pub mod sessions;
pub mod sink;
pub mod store;

// Re-export commonly used types
pub use error::SyncError;
pub use reconnect::{ExponentialBackoff, FixedDelay, NeverReconnect, ReconnectionStrategy};
pub use sessions::{SessionInfo, SessionQueryApi, SessionState, UnavailableSessions};
pub use sink::{ChimePlayer, DesktopNotifier, NoOpNotifier, SilentChime};
pub use store::{KeyValueStore, MemoryStore};
