//! Error taxonomy for workspace operations
//!
//! Every externally observable failure carries a human-readable message.
//! Best-effort paths (daemon probing, per-network discovery, per-store close)
//! log and continue instead of surfacing these.

use thiserror::Error;

/// Errors surfaced by the workspace core
#[derive(Debug, Error)]
pub enum WharfError {
    /// The security subsystem never reached Ready for this workspace run
    #[error("security subsystem not initialized: {0}")]
    NotInitialized(String),

    /// Registry key collision (network id, DID id)
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Registry key miss (network id, DID id, ACL rule)
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed id, action, resource, or oversized payload
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A record exists but is not in a state that permits the operation
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Granter/revoker lacks the authority for the requested ACL change
    #[error("insufficient permissions: {0}")]
    InsufficientPermission(String),

    /// Bind/connect attempt failed; bounded-retried before becoming fatal
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// Underlying block/document store read or write error
    #[error("storage failure: {0}")]
    Storage(String),

    /// Invariant violation inside the workspace itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for WharfError {
    fn from(e: std::io::Error) -> Self {
        WharfError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for WharfError {
    fn from(e: serde_json::Error) -> Self {
        WharfError::Storage(e.to_string())
    }
}

/// Convenience result type used throughout the crate
pub type Result<T> = std::result::Result<T, WharfError>;
