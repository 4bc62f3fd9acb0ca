//! Wire protocol
//!
//! One discrete typed message exchanged over the transport is a [`Frame`]:
//! `{ type, payload, timestamp, id? }`. Inbound payloads are decoded exactly
//! once, here, into the [`InboundEvent`] tagged union; unknown or malformed
//! frames fail closed (logged and dropped by the router) instead of leaking
//! loosely-typed data deeper into the system.

use crate::notify::Severity;
use crate::traits::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

// Inbound frame types
pub const WORKSPACE_STATUS_UPDATE: &str = "workspace_status_update";
pub const ACTIVITY_NOTIFICATION: &str = "activity_notification";
pub const SESSION_UPDATE: &str = "session_update";
pub const CONNECTION_ACK: &str = "connection_ack";
pub const PRESENCE_UPDATE: &str = "presence_update";
pub const WORKSPACE_COLLABORATION: &str = "workspace_collaboration";

// Outbound frame types
pub const SUBSCRIBE_WORKSPACE: &str = "subscribe_workspace";
pub const UNSUBSCRIBE_WORKSPACE: &str = "unsubscribe_workspace";
pub const SUBSCRIBE_NOTIFICATIONS: &str = "subscribe_notifications";
pub const UNSUBSCRIBE_NOTIFICATIONS: &str = "unsubscribe_notifications";
pub const CURSOR_BROADCAST: &str = "cursor_broadcast";

static FRAME_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_frame_id(now_ms: i64) -> String {
    let seq = FRAME_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("f-{}-{}", now_ms, seq)
}

/// One discrete typed message exchanged over the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Frame {
    /// Build an outbound frame with a fresh id and the current timestamp
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            kind: kind.into(),
            payload,
            timestamp: now,
            id: Some(next_frame_id(now)),
        }
    }
}

/// A logical subscription target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelKind {
    Workspace,
    UserNotifications,
}

/// A user's observed activity state within a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Active,
    Idle,
    Away,
}

/// Reported lifecycle state of a remote workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceState {
    Running,
    Creating,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub workspace_id: String,
    pub status: WorkspaceState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityNotification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub severity: Severity,
    pub timestamp: i64,
    #[serde(default)]
    pub auto_close: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentActivityKind {
    ActivityStart,
    ActivityUpdate,
    ActivityComplete,
    ActivityError,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentActivity {
    #[serde(rename = "type")]
    pub kind: AgentActivityKind,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// A `session_update` frame: the payload is opaque except for an optionally
/// embedded `agentActivity` sub-object
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub raw: Value,
    pub agent_activity: Option<AgentActivity>,
}

/// Payload of a `connection_ack` frame
///
/// Absorbed by the connection manager before routing: the id is stored for
/// diagnostics and never dispatched as an event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAck {
    pub connection_id: String,
}

/// Presence of one user in one workspace, as carried on the wire and as
/// mirrored in remote directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub workspace_id: String,
    pub status: PresenceStatus,
    pub last_seen: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Full-roster replacement for one workspace's presence directory
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    pub workspace_id: String,
    pub total_users: u32,
    pub active_users: Vec<PresenceRecord>,
}

/// Inbound frames after one-shot decoding at the router boundary
#[derive(Debug, Clone)]
pub enum InboundEvent {
    WorkspaceStatus(WorkspaceStatus),
    Activity(ActivityNotification),
    SessionUpdate(SessionUpdate),
    Presence(PresenceRecord),
    Roster(Roster),
}

/// Decode a frame into a typed inbound event
///
/// Returns `Ok(None)` for frame types this layer does not know about; the
/// router logs and ignores those. A known type with a malformed payload is a
/// decode error.
pub fn decode(frame: &Frame) -> Result<Option<InboundEvent>> {
    let event = match frame.kind.as_str() {
        WORKSPACE_STATUS_UPDATE => InboundEvent::WorkspaceStatus(decode_payload(frame)?),
        ACTIVITY_NOTIFICATION => InboundEvent::Activity(decode_payload(frame)?),
        SESSION_UPDATE => {
            let agent_activity = frame
                .payload
                .get("agentActivity")
                .map(|v| {
                    serde_json::from_value::<AgentActivity>(v.clone()).map_err(|e| {
                        SyncError::Decode(format!("bad agentActivity in session_update: {}", e))
                    })
                })
                .transpose()?;
            InboundEvent::SessionUpdate(SessionUpdate {
                raw: frame.payload.clone(),
                agent_activity,
            })
        }
        PRESENCE_UPDATE => InboundEvent::Presence(decode_payload(frame)?),
        WORKSPACE_COLLABORATION => InboundEvent::Roster(decode_payload(frame)?),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_payload<T: serde::de::DeserializeOwned>(frame: &Frame) -> Result<T> {
    serde_json::from_value(frame.payload.clone())
        .map_err(|e| SyncError::Decode(format!("bad {} payload: {}", frame.kind, e)))
}

/// Cursor position inside a workspace view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
}

pub fn subscribe_frame(kind: ChannelKind, key: &str) -> Frame {
    match kind {
        ChannelKind::Workspace => Frame::new(SUBSCRIBE_WORKSPACE, json!({ "workspaceId": key })),
        ChannelKind::UserNotifications => {
            Frame::new(SUBSCRIBE_NOTIFICATIONS, json!({ "userId": key }))
        }
    }
}

pub fn unsubscribe_frame(kind: ChannelKind, key: &str) -> Frame {
    match kind {
        ChannelKind::Workspace => Frame::new(UNSUBSCRIBE_WORKSPACE, json!({ "workspaceId": key })),
        ChannelKind::UserNotifications => {
            Frame::new(UNSUBSCRIBE_NOTIFICATIONS, json!({ "userId": key }))
        }
    }
}

pub fn presence_frame(
    workspace_id: &str,
    session_id: Option<&str>,
    status: PresenceStatus,
) -> Frame {
    let mut payload = json!({ "workspaceId": workspace_id, "status": status });
    if let Some(session_id) = session_id {
        payload["sessionId"] = json!(session_id);
    }
    Frame::new(PRESENCE_UPDATE, payload)
}

pub fn cursor_frame(workspace_id: &str, cursor: &CursorPosition) -> Frame {
    Frame::new(
        CURSOR_BROADCAST,
        json!({ "workspaceId": workspace_id, "cursor": cursor }),
    )
}
