//! Remote relational store abstraction
//!
//! [`RemoteStore`] is the generic upsert/query capability a backend provides.
//! [`RemoteZoneStore`] and [`RemoteContactStore`] are the typed operations the
//! sync steps use; both are implemented for every `RemoteStore`.

pub mod memory;
pub mod postgrest;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RemoteError;
use crate::models::{Contact, Zone};
use crate::payload::{
    to_rows, ContactPayload, ZonePayload, CONTACTS_TABLE, CONTACT_CONFLICT_KEYS, OWNER_COLUMN,
    ZONES_TABLE, ZONE_CONFLICT_KEYS,
};

/// Equality filter over columns, all conditions must hold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<(String, String)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.conditions.push((column.into(), value.to_string()));
        self
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    /// Check a decoded row against the filter
    pub fn matches(&self, row: &Value) -> bool {
        self.conditions.iter().all(|(column, expected)| match row.get(column) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == *expected,
        })
    }
}

/// Generic upsert/query capability of the remote store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert-or-update `rows`, resolving conflicts on `conflict_keys`;
    /// returns the rows as stored
    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Value>,
        conflict_keys: &[&str],
    ) -> Result<Vec<Value>, RemoteError>;

    /// Read every row of `table` that matches `filter`
    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, RemoteError>;
}

/// Typed operations on the remote zones collection
#[async_trait]
pub trait RemoteZoneStore: Send + Sync {
    async fn upsert_zones(&self, zones: &[ZonePayload]) -> Result<Vec<Zone>, RemoteError>;

    async fn zones_for_owner(&self, owner_id: &str) -> Result<Vec<Zone>, RemoteError>;
}

/// Typed operations on the remote contacts collection
#[async_trait]
pub trait RemoteContactStore: Send + Sync {
    async fn upsert_contacts(&self, contacts: &[ContactPayload])
        -> Result<Vec<Contact>, RemoteError>;
}

#[async_trait]
impl<S: RemoteStore + ?Sized> RemoteZoneStore for S {
    async fn upsert_zones(&self, zones: &[ZonePayload]) -> Result<Vec<Zone>, RemoteError> {
        let rows = to_rows(zones).map_err(|e| RemoteError::Rejected(e.to_string()))?;
        decode_rows(self.upsert(ZONES_TABLE, rows, ZONE_CONFLICT_KEYS).await?)
    }

    async fn zones_for_owner(&self, owner_id: &str) -> Result<Vec<Zone>, RemoteError> {
        let filter = Filter::new().eq(OWNER_COLUMN, owner_id);
        decode_rows(self.query(ZONES_TABLE, &filter).await?)
    }
}

#[async_trait]
impl<S: RemoteStore + ?Sized> RemoteContactStore for S {
    async fn upsert_contacts(
        &self,
        contacts: &[ContactPayload],
    ) -> Result<Vec<Contact>, RemoteError> {
        let rows = to_rows(contacts).map_err(|e| RemoteError::Rejected(e.to_string()))?;
        decode_rows(self.upsert(CONTACTS_TABLE, rows, CONTACT_CONFLICT_KEYS).await?)
    }
}

/// Decode raw rows into typed records
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, RemoteError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| RemoteError::Decode(e.to_string())))
        .collect()
}
