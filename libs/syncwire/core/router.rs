//! Message routing
//!
//! A registry of named handler slots, one per logical event category.
//! Registration is last-writer-wins per slot: later `update_handlers` calls
//! override earlier ones for the categories they set and leave the rest
//! untouched. Multi-listener fan-out is deliberately not provided here; that
//! is the notification center's job.

use crate::protocol::{
    self, ActivityNotification, Frame, InboundEvent, PresenceRecord, Roster, SessionUpdate,
    WorkspaceStatus,
};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A registered handler for one event category
pub type Slot<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Connection lifecycle events dispatched through the router's lifecycle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Transport opened; `reconnected` is true when a prior successful
    /// connection existed in this connect() epoch
    Open { reconnected: bool },
    /// An open connection was lost non-cleanly; retries are scheduled.
    /// Dispatched once per loss, not once per retry attempt.
    Lost,
    /// Retry budget exhausted
    Failed,
    /// Clean close requested by the owner
    Closed,
}

#[derive(Default)]
struct Handlers {
    workspace_status: Option<Slot<WorkspaceStatus>>,
    activity: Option<Slot<ActivityNotification>>,
    session_update: Option<Slot<SessionUpdate>>,
    presence: Option<Slot<PresenceRecord>>,
    roster: Option<Slot<Roster>>,
    lifecycle: Option<Slot<LifecycleEvent>>,
}

/// Partial handler set merged into the registry by `update_handlers`
///
/// `Some` fields replace the current slot; `None` fields leave it alone.
#[derive(Default, Clone)]
pub struct HandlerUpdate {
    pub workspace_status: Option<Slot<WorkspaceStatus>>,
    pub activity: Option<Slot<ActivityNotification>>,
    pub session_update: Option<Slot<SessionUpdate>>,
    pub presence: Option<Slot<PresenceRecord>>,
    pub roster: Option<Slot<Roster>>,
    pub lifecycle: Option<Slot<LifecycleEvent>>,
}

/// Decodes inbound frames into typed events and dispatches them to the
/// registered handler slots
#[derive(Default)]
pub struct MessageRouter {
    handlers: RwLock<Handlers>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a partial handler set into the registry (last-writer-wins)
    pub fn update_handlers(&self, update: HandlerUpdate) {
        let mut handlers = self.handlers.write();
        if let Some(slot) = update.workspace_status {
            handlers.workspace_status = Some(slot);
        }
        if let Some(slot) = update.activity {
            handlers.activity = Some(slot);
        }
        if let Some(slot) = update.session_update {
            handlers.session_update = Some(slot);
        }
        if let Some(slot) = update.presence {
            handlers.presence = Some(slot);
        }
        if let Some(slot) = update.roster {
            handlers.roster = Some(slot);
        }
        if let Some(slot) = update.lifecycle {
            handlers.lifecycle = Some(slot);
        }
    }

    /// Decode and dispatch one inbound frame
    ///
    /// Decode failures and unknown types are logged and dropped; a handler
    /// panic is caught here and never reaches the transport callback.
    pub fn dispatch_frame(&self, frame: &Frame) {
        let event = match protocol::decode(frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!(kind = %frame.kind, "no decoder for frame type, dropping");
                return;
            }
            Err(e) => {
                warn!(kind = %frame.kind, error = %e, "dropping malformed frame");
                return;
            }
        };

        match event {
            InboundEvent::WorkspaceStatus(s) => {
                self.invoke("workspace_status", self.handlers.read().workspace_status.clone(), s)
            }
            InboundEvent::Activity(a) => {
                self.invoke("activity", self.handlers.read().activity.clone(), a)
            }
            InboundEvent::SessionUpdate(u) => {
                self.invoke("session_update", self.handlers.read().session_update.clone(), u)
            }
            InboundEvent::Presence(p) => {
                self.invoke("presence", self.handlers.read().presence.clone(), p)
            }
            InboundEvent::Roster(r) => {
                self.invoke("roster", self.handlers.read().roster.clone(), r)
            }
        }
    }

    /// Dispatch a connection lifecycle event
    pub fn dispatch_lifecycle(&self, event: LifecycleEvent) {
        let slot = self.handlers.read().lifecycle.clone();
        self.invoke("lifecycle", slot, event);
    }

    fn invoke<T>(&self, category: &str, slot: Option<Slot<T>>, value: T) {
        let Some(handler) = slot else {
            debug!(category, "no handler registered, dropping event");
            return;
        };
        // The slot is cloned out of the lock above; a panicking handler must
        // not poison dispatch for later events.
        if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
            error!(category, "handler panicked, event dropped");
        }
    }
}
