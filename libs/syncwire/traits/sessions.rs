use crate::traits::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an asynchronously-provisioned session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Creating,
    Running,
    Stopped,
    Error,
}

/// A session as reported by the Session Query API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub state: SessionState,
}

impl SessionInfo {
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Running
    }
}

/// External query surface for workspace sessions
///
/// The readiness monitor never talks to the network directly; everything it
/// knows about sessions comes through this trait.
#[async_trait]
pub trait SessionQueryApi: Send + Sync + 'static {
    /// List all sessions belonging to a workspace
    async fn list_sessions(&self, workspace_id: &str) -> Result<Vec<SessionInfo>>;

    /// Request creation of a new session
    async fn create_session(&self, workspace_id: &str, name: &str) -> Result<SessionInfo>;

    /// Fetch a single session by id
    async fn get_session(&self, workspace_id: &str, session_id: &str) -> Result<SessionInfo>;
}

/// A session API that reports every query as unavailable
///
/// Useful as a default when the readiness monitor is not wired to a backend.
pub struct UnavailableSessions;

#[async_trait]
impl SessionQueryApi for UnavailableSessions {
    async fn list_sessions(&self, _workspace_id: &str) -> Result<Vec<SessionInfo>> {
        Err(SyncError::Query("session api not configured".into()))
    }

    async fn create_session(&self, _workspace_id: &str, _name: &str) -> Result<SessionInfo> {
        Err(SyncError::Query("session api not configured".into()))
    }

    async fn get_session(&self, _workspace_id: &str, _session_id: &str) -> Result<SessionInfo> {
        Err(SyncError::Query("session api not configured".into()))
    }
}
