//! In-memory relational store
//!
//! Behaves like the remote backend closely enough to exercise a full sync:
//! auto-increment ids, timestamps, conflict-target upserts, statement
//! atomicity, null primary key rejection and the `contacts.zona_id`
//! foreign key. Call counters plus failure and latency injection make it
//! the store used by tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use super::{Filter, RemoteStore};
use crate::error::RemoteError;
use crate::payload::{CONTACTS_TABLE, ZONES_TABLE};

/// Store operation, for call accounting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StoreOp {
    Upsert,
    Query,
}

type Row = Map<String, Value>;

#[derive(Debug, Default)]
struct StoreState {
    tables: BTreeMap<String, Vec<Row>>,
    next_id: BTreeMap<String, i64>,
    calls: BTreeMap<(StoreOp, String), usize>,
    failures: BTreeMap<(StoreOp, String), RemoteError>,
    latency: Option<Duration>,
}

/// Shared in-memory store; clones see the same tables
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panicked test thread must not wedge the other clones
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every `op` on `table` fail with `error` until cleared
    pub fn inject_failure(&self, op: StoreOp, table: &str, error: RemoteError) {
        self.lock().failures.insert((op, table.to_string()), error);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Delay every call by `latency` before it runs
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Number of `op` calls made against `table`, failed ones included
    pub fn calls(&self, op: StoreOp, table: &str) -> usize {
        self.lock()
            .calls
            .get(&(op, table.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Snapshot of a table's rows
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, Vec::len)
    }

    /// Insert a zone directly, bypassing call accounting; returns its id
    pub fn seed_zone(&self, owner_id: &str, name: &str, description: &str) -> i64 {
        let mut state = self.lock();
        let mut row = Row::new();
        row.insert("user_id".into(), Value::from(owner_id));
        row.insert("nombre".into(), Value::from(name));
        row.insert("descripcion".into(), Value::from(description));
        insert_row(&mut state, ZONES_TABLE, row)
    }

    fn begin(&self, op: StoreOp, table: &str) -> (Option<Duration>, Option<RemoteError>) {
        let mut state = self.lock();
        *state.calls.entry((op, table.to_string())).or_insert(0) += 1;
        let failure = state.failures.get(&(op, table.to_string())).cloned();
        (state.latency, failure)
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Value>,
        conflict_keys: &[&str],
    ) -> Result<Vec<Value>, RemoteError> {
        let (latency, failure) = self.begin(StoreOp::Upsert, table);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let rows = rows
            .into_iter()
            .map(|row| match row {
                Value::Object(map) => Ok(map),
                other => Err(RemoteError::Rejected(format!("row is not an object: {}", other))),
            })
            .collect::<Result<Vec<Row>, _>>()?;

        let mut state = self.lock();

        // One statement: validate against a copy, commit only on success
        let snapshot_table = state.tables.get(table).cloned().unwrap_or_default();
        let snapshot_next = state.next_id.get(table).copied();

        let result = apply_upsert(&mut state, table, rows, conflict_keys);
        if result.is_err() {
            state.tables.insert(table.to_string(), snapshot_table);
            match snapshot_next {
                Some(next) => state.next_id.insert(table.to_string(), next),
                None => state.next_id.remove(table),
            };
        }
        result
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, RemoteError> {
        let (latency, failure) = self.begin(StoreOp::Query, table);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let state = self.lock();
        Ok(state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|row| Value::Object(row.clone()))
                    .filter(|row| filter.matches(row))
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn apply_upsert(
    state: &mut StoreState,
    table: &str,
    rows: Vec<Row>,
    conflict_keys: &[&str],
) -> Result<Vec<Value>, RemoteError> {
    let mut touched: Vec<i64> = Vec::with_capacity(rows.len());
    let mut stored = Vec::with_capacity(rows.len());

    for row in rows {
        if matches!(row.get("id"), Some(Value::Null)) {
            return Err(RemoteError::Rejected(
                "null value in column \"id\" violates not-null constraint".to_string(),
            ));
        }
        if table == CONTACTS_TABLE {
            check_zone_reference(state, &row)?;
        }

        let existing = find_conflict(state, table, &row, conflict_keys)
            .and_then(|index| state.tables.get_mut(table)?.get_mut(index));
        let id = match existing {
            Some(target) => {
                for (column, value) in row {
                    if column != "id" && column != "created_at" {
                        target.insert(column, value);
                    }
                }
                target.insert("updated_at".into(), Value::from(Utc::now().to_rfc3339()));
                row_id(target).unwrap_or_default()
            }
            None => insert_row(state, table, row),
        };

        if touched.contains(&id) {
            return Err(RemoteError::Rejected(
                "ON CONFLICT DO UPDATE command cannot affect row a second time".to_string(),
            ));
        }
        touched.push(id);

        let row = state
            .tables
            .get(table)
            .and_then(|rows| rows.iter().find(|r| row_id(r) == Some(id)))
            .cloned()
            .map(Value::Object)
            .unwrap_or(Value::Null);
        stored.push(row);
    }

    Ok(stored)
}

fn find_conflict(state: &StoreState, table: &str, row: &Row, keys: &[&str]) -> Option<usize> {
    if keys.is_empty() || keys.iter().any(|k| row.get(*k).map_or(true, Value::is_null)) {
        return None;
    }
    state.tables.get(table)?.iter().position(|existing| {
        keys.iter()
            .all(|k| existing.get(*k).is_some() && existing.get(*k) == row.get(*k))
    })
}

fn check_zone_reference(state: &StoreState, row: &Row) -> Result<(), RemoteError> {
    let zone_id = row.get("zona_id").and_then(Value::as_i64);
    let exists = zone_id.map_or(false, |zone_id| {
        state
            .tables
            .get(ZONES_TABLE)
            .map_or(false, |zones| zones.iter().any(|z| row_id(z) == Some(zone_id)))
    });

    if exists {
        Ok(())
    } else {
        Err(RemoteError::Rejected(format!(
            "insert or update on table \"contacts\" violates foreign key constraint (zona_id={})",
            row.get("zona_id").cloned().unwrap_or(Value::Null)
        )))
    }
}

fn insert_row(state: &mut StoreState, table: &str, mut row: Row) -> i64 {
    let next = state.next_id.entry(table.to_string()).or_insert(1);
    let id = match row.get("id").and_then(Value::as_i64) {
        Some(explicit) => {
            *next = (*next).max(explicit + 1);
            explicit
        }
        None => {
            let id = *next;
            *next += 1;
            id
        }
    };

    let now = Value::from(Utc::now().to_rfc3339());
    row.insert("id".into(), Value::from(id));
    row.insert("created_at".into(), now.clone());
    row.insert("updated_at".into(), now);
    state.tables.entry(table.to_string()).or_default().push(row);
    id
}

fn row_id(row: &Row) -> Option<i64> {
    row.get("id").and_then(Value::as_i64)
}
