//! Workspace Sync - Main Library
//!
//! This crate ties the workspace together for binary executables: the
//! syncwire library does the actual work, this layer re-exports it and hosts
//! the shared binary plumbing (logging setup, environment loading).
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use workspace_sync::bin_common::init_logging;
//! use workspace_sync::syncwire::{SyncClient, SyncClientConfig};
//! ```

// Re-export the workspace library for convenience
pub use syncwire;

// Binary common utilities
pub mod bin_common {
    //! Shared plumbing for binary executables

    use tracing_subscriber::EnvFilter;

    /// Initialize tracing from RUST_LOG, defaulting to info
    pub fn init_logging() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    /// Read an environment variable with a fallback
    pub fn env_or(key: &str, default: &str) -> String {
        std::env::var(key).unwrap_or_else(|_| default.to_string())
    }
}
