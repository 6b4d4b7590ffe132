//! Sync error taxonomy.

use thiserror::Error;

use super::wire::MappingError;
use crate::db::StoreError;

/// Errors that can end a sync round.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync not configured. Add server_url and api_key to config.")]
    NotConfigured,

    #[error("Offline: the sync server is not reachable")]
    Offline,

    /// Another round is already running, locally or for this account on the server.
    #[error("A sync round is already in progress")]
    AlreadySyncing,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server rejected sync ({status}): {message}")]
    ServerRejection { status: u16, message: String },

    #[error("Malformed server response: {0}")]
    Malformed(String),

    #[error("Failed to apply server changes: {0}")]
    Apply(#[source] StoreError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Benign outcomes that callers treat as a no-op.
    pub fn is_benign(&self) -> bool {
        matches!(self, SyncError::AlreadySyncing)
    }

    /// Whether the next scheduled trigger may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Offline | SyncError::Transport(_) | SyncError::Apply(_)
        )
    }
}

impl From<MappingError> for SyncError {
    fn from(e: MappingError) -> Self {
        SyncError::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_syncing_is_benign() {
        assert!(SyncError::AlreadySyncing.is_benign());
        assert!(!SyncError::Offline.is_benign());
        assert!(!SyncError::Transport("reset".into()).is_benign());
    }

    #[test]
    fn test_unauthorized_is_not_retryable() {
        assert!(!SyncError::Unauthorized("expired token".into()).is_retryable());
        assert!(SyncError::Transport("timeout".into()).is_retryable());
        assert!(!SyncError::ServerRejection {
            status: 422,
            message: "bad".into()
        }
        .is_retryable());
    }
}
