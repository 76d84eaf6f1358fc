//! Error types for zone/contact synchronization
//!
//! Errors are layered by boundary:
//!
//! - [`RemoteError`] - a single call to the remote store failed
//! - [`IdentityError`] - the owner identity could not be resolved
//! - [`SyncError`] - the sync taxonomy every step reports in
//! - [`SyncFailure`] - the terminal error of one orchestrator run, naming the
//!   stage that failed

use std::time::Duration;

use thiserror::Error;

use crate::sync::SyncState;

/// Result type alias for sync steps
pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure of one call against the remote store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The backend answered with a non-success status
    #[error("backend returned {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never produced a response
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded into rows
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The backend refused the rows (constraint violation, null primary key, ...)
    #[error("rows rejected: {0}")]
    Rejected(String),

    /// The call did not finish within its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to obtain the current owner identity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no active session")]
    NoSession,

    #[error("identity lookup failed: {0}")]
    Remote(#[from] RemoteError),
}

/// Errors a sync step can report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No active session; nothing was attempted
    #[error("no active session, sign in before syncing")]
    Unauthenticated,

    /// Network or backend failure on an upsert/query call
    #[error("remote store unavailable during {operation}: {reason}")]
    RemoteUnavailable { operation: String, reason: String },

    /// A contact group names a zone absent from the resolved zone map
    #[error("zone '{0}' not found or created for the owner")]
    ZoneNotFound(String),

    /// A flat contact carries no usable zone identifier
    #[error("contact '{contact}' has no zone identifier")]
    MissingForeignKey { contact: String },

    /// A staged record is missing a required field or is otherwise invalid
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The run was cancelled by the caller
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a remote-unavailable error for the named operation
    pub fn remote(operation: impl Into<String>, err: RemoteError) -> Self {
        Self::RemoteUnavailable {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }

    /// Create a malformed-payload error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload(reason.into())
    }

    /// Short machine-readable kind, used as a metrics label and log field
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Unauthenticated => "unauthenticated",
            SyncError::RemoteUnavailable { .. } => "remote_unavailable",
            SyncError::ZoneNotFound(_) => "zone_not_found",
            SyncError::MissingForeignKey { .. } => "missing_foreign_key",
            SyncError::MalformedPayload(_) => "malformed_payload",
            SyncError::Cancelled => "cancelled",
        }
    }
}

impl From<IdentityError> for SyncError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NoSession => SyncError::Unauthenticated,
            IdentityError::Remote(e) => SyncError::remote("resolve identity", e),
        }
    }
}

/// Terminal error of one orchestrator run
///
/// Writes acknowledged before the failure stay committed remotely.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("sync failed while {stage}: {error}")]
pub struct SyncFailure {
    pub stage: SyncState,
    #[source]
    pub error: SyncError,
}

impl SyncFailure {
    pub fn new(stage: SyncState, error: SyncError) -> Self {
        Self { stage, error }
    }
}
