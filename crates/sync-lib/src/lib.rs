//! Zone and contact synchronization library
//!
//! This crate provides the core functionality for:
//! - Validating locally staged zones and contacts
//! - Resolving remote zone identity by (owner, name)
//! - Upserting contacts against resolved zone references
//! - Remote store adapters (PostgREST over HTTP, in-memory)
//! - Metrics and structured logging for sync runs

pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod observability;
pub mod payload;
pub mod remote;
pub mod sync;

pub use config::{FailurePolicy, RemoteConfig, SyncConfig};
pub use error::{IdentityError, RemoteError, Result, SyncError, SyncFailure};
pub use identity::{GoTrueIdentity, IdentityResolver, SessionIdentity, StaticIdentity};
pub use models::*;
pub use observability::{SyncLogger, SyncMetrics};
pub use remote::{
    memory::InMemoryStore, postgrest::PostgrestClient, Filter, RemoteContactStore, RemoteStore,
    RemoteZoneStore,
};
pub use sync::{
    ContactUploader, OwnerGuard, OwnerLocks, SyncOrchestrator, SyncState, ZoneResolver,
};
