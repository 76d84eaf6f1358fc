//! Zone resolution by (owner, name)

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::with_timeout;
use crate::error::{Result, SyncError};
use crate::models::{StagedZone, Zone};
use crate::payload::ZonePayload;
use crate::remote::RemoteZoneStore;

/// Upserts staged zones and builds the authoritative name -> zone map
///
/// The map always comes from a read issued after the write. The upsert
/// response is only used to notice a short acknowledgement.
#[derive(Clone)]
pub struct ZoneResolver {
    store: Arc<dyn RemoteZoneStore>,
    timeout: Duration,
}

impl ZoneResolver {
    pub fn new(store: Arc<dyn RemoteZoneStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Upsert `zones` for `owner_id`, then map every zone the owner has
    ///
    /// Fails with `ZoneNotFound` if a staged zone is missing from the read.
    pub async fn resolve(
        &self,
        owner_id: &str,
        zones: &[StagedZone],
    ) -> Result<BTreeMap<String, Zone>> {
        if zones.is_empty() {
            debug!(owner = %owner_id, "No staged zones, reading existing zones only");
        } else {
            let payload: Vec<ZonePayload> = zones
                .iter()
                .map(|zone| ZonePayload::encode(owner_id, zone))
                .collect();

            let acknowledged =
                with_timeout(self.timeout, "upsert zones", self.store.upsert_zones(&payload))
                    .await?;

            if acknowledged.len() < payload.len() {
                warn!(
                    owner = %owner_id,
                    sent = payload.len(),
                    acknowledged = acknowledged.len(),
                    "Zone upsert acknowledged fewer rows than sent"
                );
            }
        }

        let mut remote = with_timeout(
            self.timeout,
            "query zones",
            self.store.zones_for_owner(owner_id),
        )
        .await?;

        // Oldest row wins if the backend ever holds a duplicate name
        remote.sort_by_key(|zone| zone.id);

        let mut by_name = BTreeMap::new();
        for zone in remote {
            if zone.id.map_or(true, |id| id <= 0) {
                warn!(owner = %owner_id, zone = %zone.name, "Skipping zone row without id");
                continue;
            }
            if zone.owner_id.as_deref().map_or(false, |o| o != owner_id) {
                warn!(owner = %owner_id, zone = %zone.name, "Skipping zone row of another owner");
                continue;
            }
            by_name.entry(zone.name.clone()).or_insert(zone);
        }

        if let Some(missing) = zones.iter().find(|z| !by_name.contains_key(&z.name)) {
            return Err(SyncError::ZoneNotFound(missing.name.clone()));
        }

        Ok(by_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::payload::ZONES_TABLE;
    use crate::remote::memory::{InMemoryStore, StoreOp};

    fn resolver(store: &InMemoryStore) -> ZoneResolver {
        ZoneResolver::new(Arc::new(store.clone()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_one_entry_per_distinct_name() {
        let store = InMemoryStore::new();
        let staged = vec![
            StagedZone::new("Centro"),
            StagedZone::new("Norte"),
            StagedZone::new("Sur"),
        ];

        let map = resolver(&store).resolve("owner-1", &staged).await.unwrap();

        assert_eq!(map.len(), 3);
        for zone in &staged {
            assert!(map[&zone.name].id.unwrap() > 0);
        }
    }

    #[tokio::test]
    async fn test_reupsert_keeps_id_and_applies_last_description() {
        let store = InMemoryStore::new();
        let resolver = resolver(&store);

        let first = resolver
            .resolve("owner-1", &[StagedZone::new("Centro").with_description("uno")])
            .await
            .unwrap();
        let second = resolver
            .resolve("owner-1", &[StagedZone::new("Centro").with_description("dos")])
            .await
            .unwrap();

        assert_eq!(first["Centro"].id, second["Centro"].id);
        assert_eq!(second["Centro"].description.as_deref(), Some("dos"));
        assert_eq!(store.row_count(ZONES_TABLE), 1);
    }

    #[tokio::test]
    async fn test_empty_list_still_reads_existing_zones() {
        let store = InMemoryStore::new();
        let id = store.seed_zone("owner-1", "Centro", "");
        store.seed_zone("owner-2", "Lejos", "");

        let map = resolver(&store).resolve("owner-1", &[]).await.unwrap();

        assert_eq!(store.calls(StoreOp::Upsert, ZONES_TABLE), 0);
        assert_eq!(store.calls(StoreOp::Query, ZONES_TABLE), 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map["Centro"].id, Some(id));
    }

    #[tokio::test]
    async fn test_upsert_failure_aborts_before_read() {
        let store = InMemoryStore::new();
        store.inject_failure(
            StoreOp::Upsert,
            ZONES_TABLE,
            RemoteError::Http {
                status: 500,
                body: "boom".to_string(),
            },
        );

        let err = resolver(&store)
            .resolve("owner-1", &[StagedZone::new("Centro")])
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::RemoteUnavailable { ref operation, .. } if operation == "upsert zones"));
        assert_eq!(store.calls(StoreOp::Query, ZONES_TABLE), 0);
    }

    #[tokio::test]
    async fn test_read_failure_returns_no_partial_map() {
        let store = InMemoryStore::new();
        store.inject_failure(
            StoreOp::Query,
            ZONES_TABLE,
            RemoteError::Transport("reset".to_string()),
        );

        let result = resolver(&store).resolve("owner-1", &[StagedZone::new("Centro")]).await;

        assert!(matches!(result, Err(SyncError::RemoteUnavailable { .. })));
        // The write landed even though the step failed
        assert_eq!(store.row_count(ZONES_TABLE), 1);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = InMemoryStore::new();
        store.set_latency(Duration::from_millis(200));
        let resolver = ZoneResolver::new(Arc::new(store.clone()), Duration::from_millis(20));

        let err = resolver.resolve("owner-1", &[]).await.unwrap_err();

        match err {
            SyncError::RemoteUnavailable { operation, reason } => {
                assert_eq!(operation, "query zones");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
