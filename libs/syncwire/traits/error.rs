use thiserror::Error;

/// Main error type for syncwire
#[derive(Error, Debug)]
pub enum SyncError {
    /// Socket-level failure or abnormal close
    #[error("transport error: {0}")]
    Transport(String),

    /// Connection closed unexpectedly
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Malformed or unparseable frame
    #[error("decode error: {0}")]
    Decode(String),

    /// Session/workspace lookup failure from the Session Query API
    #[error("query error: {0}")]
    Query(String),

    /// Failure raised inside a registered handler or subscriber
    #[error("handler error: {0}")]
    Handler(String),

    /// Settings/history write failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Channel send error
    #[error("channel send error: {0}")]
    ChannelSend(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid state transition
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Timeout error
    #[error("operation timed out: {0}")]
    Timeout(String),
}

/// Result type for syncwire operations
pub type Result<T> = std::result::Result<T, SyncError>;
