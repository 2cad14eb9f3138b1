use std::path::PathBuf;

use thiserror::Error;

use crate::types::Platform;

#[derive(Error, Debug)]
pub enum BridgeError {
    // Remote adapter errors
    #[error("{platform} rejected the credentials: {message}")]
    Unauthorized { platform: Platform, message: String },

    #[error("{platform} token lacks the required scope: {message}")]
    Forbidden { platform: Platform, message: String },

    #[error("{platform} item '{id}' not found")]
    NotFound { platform: Platform, id: String },

    #[error("{platform} temporarily unavailable: {message}")]
    Transient { platform: Platform, message: String },

    #[error("{platform} API error: {message}")]
    Api { platform: Platform, message: String },

    #[error("{platform} ticket '{ticket_id}': {source}")]
    Ticket {
        ticket_id: String,
        platform: Platform,
        #[source]
        source: Box<BridgeError>,
    },

    // Mapping and registry errors
    #[error("cannot link {task_id} to {issue_id}: {reason}")]
    MappingConflict {
        task_id: String,
        issue_id: String,
        reason: String,
    },

    #[error("ticket '{0}' is not present in the current analysis")]
    UnknownTicket(String),

    // Operation errors
    #[error("a sync batch is already running for user '{user}' on project '{project}'")]
    BatchInFlight { user: String, project: String },

    #[error("sync operation '{0}' not found")]
    OperationNotFound(String),

    #[error("cannot rollback operation '{id}': status is {status}")]
    InvalidOperationState { id: String, status: String },

    #[error("cannot rollback operation '{0}': snapshot expired")]
    SnapshotExpired(String),

    #[error("cannot rollback operation '{0}': no snapshot recorded")]
    SnapshotMissing(String),

    #[error("rollback of operation '{id}' incomplete: {failed} step(s) failed")]
    RollbackIncomplete { id: String, failed: usize },

    // Enum parsing errors
    #[error("invalid platform '{0}'")]
    InvalidPlatform(String),

    #[error("invalid audit action '{0}'")]
    InvalidAuditAction(String),

    #[error("invalid operation kind '{0}'")]
    InvalidOperationKind(String),

    #[error("invalid operation status '{0}'")]
    InvalidOperationStatus(String),

    #[error("invalid ignore type '{0}', expected 'temp' or 'forever'")]
    InvalidIgnoreType(String),

    #[error("invalid delete scope '{0}', expected 'task', 'issue' or 'both'")]
    InvalidDeleteScope(String),

    #[error("invalid storage backend '{0}', expected 'file' or 'sqlite'")]
    InvalidBackend(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    // Ambient errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to {operation} {}: {source}", path.display())]
    Storage {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// True for 401/403 failures. A batch that hits one of these cannot make
    /// progress on any ticket and is aborted.
    pub fn is_auth(&self) -> bool {
        match self {
            BridgeError::Unauthorized { .. } | BridgeError::Forbidden { .. } => true,
            BridgeError::Ticket { source, .. } => source.is_auth(),
            _ => false,
        }
    }

    /// True for failures worth retrying on the next scheduled tick.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Transient { .. } => true,
            BridgeError::Ticket { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// True for any failure reported by a remote system.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            BridgeError::Unauthorized { .. }
                | BridgeError::Forbidden { .. }
                | BridgeError::NotFound { .. }
                | BridgeError::Transient { .. }
                | BridgeError::Api { .. }
                | BridgeError::Ticket { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            BridgeError::NotFound { .. } => true,
            BridgeError::Ticket { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Attach ticket context so the message is usable as-is in an audit entry.
    pub fn for_ticket(self, ticket_id: impl Into<String>, platform: Platform) -> Self {
        match self {
            already @ BridgeError::Ticket { .. } => already,
            other => BridgeError::Ticket {
                ticket_id: ticket_id.into(),
                platform,
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn storage(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BridgeError::Storage {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_platform(s: String) -> Self {
        BridgeError::InvalidPlatform(s)
    }

    pub(crate) fn invalid_audit_action(s: String) -> Self {
        BridgeError::InvalidAuditAction(s)
    }

    pub(crate) fn invalid_operation_kind(s: String) -> Self {
        BridgeError::InvalidOperationKind(s)
    }

    pub(crate) fn invalid_operation_status(s: String) -> Self {
        BridgeError::InvalidOperationStatus(s)
    }

    pub(crate) fn invalid_ignore_type(s: String) -> Self {
        BridgeError::InvalidIgnoreType(s)
    }

    pub(crate) fn invalid_delete_scope(s: String) -> Self {
        BridgeError::InvalidDeleteScope(s)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_context_preserves_classification() {
        let err = BridgeError::Unauthorized {
            platform: Platform::Tracker,
            message: "bad token".to_string(),
        }
        .for_ticket("T-1", Platform::Tracker);

        assert!(err.is_auth());
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "tracker ticket 'T-1': tracker rejected the credentials: bad token"
        );
    }

    #[test]
    fn test_for_ticket_does_not_double_wrap() {
        let err = BridgeError::Transient {
            platform: Platform::Board,
            message: "502".to_string(),
        }
        .for_ticket("T-1", Platform::Board)
        .for_ticket("T-2", Platform::Tracker);

        match err {
            BridgeError::Ticket { ticket_id, .. } => assert_eq!(ticket_id, "T-1"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_not_found_classification() {
        let err = BridgeError::NotFound {
            platform: Platform::Tracker,
            id: "SEC-1".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_auth());
    }
}
