//! Zone/contact synchronization with the remote store
//!
//! This module provides:
//! - Zone resolution: upsert staged zones, then build the name -> zone map
//!   from a fresh read
//! - Contact upload: flat contacts with concrete zone ids, and contacts
//!   grouped by zone name
//! - The orchestrator sequencing identity -> zones -> contacts under a
//!   per-owner lock

mod contacts;
mod lock;
mod orchestrator;
mod zones;


pub use contacts::ContactUploader;
pub use lock::{OwnerGuard, OwnerLocks};
pub use orchestrator::SyncOrchestrator;
pub use zones::ZoneResolver;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::error::{RemoteError, Result, SyncError};

/// Lifecycle of one orchestrator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Validating,
    ResolvingIdentity,
    UpsertingZones,
    ContactUpload,
    Completed,
    Failed,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Completed | SyncState::Failed)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Validating => write!(f, "validating the batch"),
            SyncState::ResolvingIdentity => write!(f, "resolving identity"),
            SyncState::UpsertingZones => write!(f, "upserting zones"),
            SyncState::ContactUpload => write!(f, "uploading contacts"),
            SyncState::Completed => write!(f, "completed"),
            SyncState::Failed => write!(f, "failed"),
        }
    }
}

/// Run one remote call under a deadline
pub(crate) async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, RemoteError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(SyncError::remote(operation, e)),
        Err(_) => Err(SyncError::remote(operation, RemoteError::Timeout(limit))),
    }
}
