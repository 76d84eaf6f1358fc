//! Contact upload

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::with_timeout;
use crate::error::{Result, SyncError};
use crate::models::{Contact, StagedContact, Zone};
use crate::payload::ContactPayload;
use crate::remote::RemoteContactStore;

/// Uploads staged contacts, one upsert per flat list or zone group
#[derive(Clone)]
pub struct ContactUploader {
    store: Arc<dyn RemoteContactStore>,
    timeout: Duration,
}

impl ContactUploader {
    pub fn new(store: Arc<dyn RemoteContactStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Upload contacts that already carry a concrete zone id
    ///
    /// Any contact without a real zone id fails the whole list with
    /// `MissingForeignKey` before a call is made.
    pub async fn upload_flat(
        &self,
        owner_id: &str,
        contacts: &[StagedContact],
    ) -> Result<Vec<Contact>> {
        if contacts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = contacts
            .iter()
            .map(|contact| {
                let zone_id = contact
                    .effective_zone_id()
                    .ok_or_else(|| SyncError::MissingForeignKey {
                        contact: contact.name.clone(),
                    })?;
                ContactPayload::encode(owner_id, zone_id, contact)
            })
            .collect::<Result<Vec<_>>>()?;

        self.send(owner_id, payload, "upsert contacts").await
    }

    /// Split a flat list into uploadable contacts and one error per contact
    /// lacking a zone id
    pub fn split_unresolved(contacts: &[StagedContact]) -> (Vec<StagedContact>, Vec<SyncError>) {
        let mut ready = Vec::with_capacity(contacts.len());
        let mut missing = Vec::new();
        for contact in contacts {
            if contact.effective_zone_id().is_some() {
                ready.push(contact.clone());
            } else {
                missing.push(SyncError::MissingForeignKey {
                    contact: contact.name.clone(),
                });
            }
        }
        (ready, missing)
    }

    /// Upload one group of contacts addressed by zone name
    ///
    /// The zone is looked up in `zones` first; an unknown name fails with
    /// `ZoneNotFound` without touching the store.
    pub async fn upload_group(
        &self,
        owner_id: &str,
        zone_name: &str,
        contacts: &[StagedContact],
        zones: &BTreeMap<String, Zone>,
    ) -> Result<Vec<Contact>> {
        let zone_id = zones
            .get(zone_name)
            .and_then(|zone| zone.id)
            .filter(|id| *id > 0)
            .ok_or_else(|| SyncError::ZoneNotFound(zone_name.to_string()))?;

        if contacts.is_empty() {
            debug!(owner = %owner_id, zone = %zone_name, "Empty contact group, nothing to upload");
            return Ok(Vec::new());
        }

        let payload = contacts
            .iter()
            .map(|contact| ContactPayload::encode(owner_id, zone_id, contact))
            .collect::<Result<Vec<_>>>()?;

        self.send(owner_id, payload, &format!("upsert contacts for zone '{}'", zone_name))
            .await
    }

    async fn send(
        &self,
        owner_id: &str,
        payload: Vec<ContactPayload>,
        operation: &str,
    ) -> Result<Vec<Contact>> {
        debug!(owner = %owner_id, rows = payload.len(), operation, "Uploading contacts");
        with_timeout(self.timeout, operation, self.store.upsert_contacts(&payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::CONTACTS_TABLE;
    use crate::remote::memory::{InMemoryStore, StoreOp};

    fn uploader(store: &InMemoryStore) -> ContactUploader {
        ContactUploader::new(Arc::new(store.clone()), Duration::from_secs(5))
    }

    fn zone_map(store: &InMemoryStore, name: &str) -> BTreeMap<String, Zone> {
        let id = store.seed_zone("owner-1", name, "");
        let zone = Zone {
            id: Some(id),
            owner_id: Some("owner-1".to_string()),
            name: name.to_string(),
            description: Some(String::new()),
            created_at: None,
            updated_at: None,
        };
        BTreeMap::from([(name.to_string(), zone)])
    }

    #[tokio::test]
    async fn test_group_upload_uses_resolved_zone_id() {
        let store = InMemoryStore::new();
        let zones = zone_map(&store, "Centro");
        let expected = zones["Centro"].id;

        let rows = uploader(&store)
            .upload_group(
                "owner-1",
                "Centro",
                &[StagedContact::new("Ana"), StagedContact::new("Luis")],
                &zones,
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|c| c.zone_id == expected));
        assert!(rows.iter().all(|c| c.phone.as_deref() == Some("")));
        assert!(rows.iter().all(|c| c.attendance == Some(false)));
        assert_eq!(store.calls(StoreOp::Upsert, CONTACTS_TABLE), 1);
    }

    #[tokio::test]
    async fn test_unknown_zone_makes_no_call() {
        let store = InMemoryStore::new();
        let zones = zone_map(&store, "Centro");

        let err = uploader(&store)
            .upload_group("owner-1", "Norte", &[StagedContact::new("Ana")], &zones)
            .await
            .unwrap_err();

        assert_eq!(err, SyncError::ZoneNotFound("Norte".to_string()));
        assert_eq!(store.calls(StoreOp::Upsert, CONTACTS_TABLE), 0);
    }

    #[tokio::test]
    async fn test_flat_sentinel_zone_id_is_missing_foreign_key() {
        let store = InMemoryStore::new();
        let contacts = [StagedContact::new("Ana").with_zone_id(0)];

        let err = uploader(&store)
            .upload_flat("owner-1", &contacts)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SyncError::MissingForeignKey {
                contact: "Ana".to_string()
            }
        );
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_flat_upload_with_known_zone() {
        let store = InMemoryStore::new();
        let zone_id = store.seed_zone("owner-1", "Centro", "");
        let contacts = [StagedContact::new("Ana")
            .with_zone_id(zone_id)
            .with_phone("+52 555 123 4567")
            .with_flags(true, false)];

        let rows = uploader(&store).upload_flat("owner-1", &contacts).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].phone.as_deref(), Some("5551234567"));
        assert_eq!(rows[0].attendance, Some(true));
        assert!(rows[0].id.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_empty_flat_list_makes_no_call() {
        let store = InMemoryStore::new();
        let rows = uploader(&store).upload_flat("owner-1", &[]).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(store.total_calls(), 0);
    }

    #[test]
    fn test_split_unresolved() {
        let contacts = vec![
            StagedContact::new("Ana").with_zone_id(3),
            StagedContact::new("Luis"),
            StagedContact::new("Eva").with_zone_id(-1),
        ];

        let (ready, missing) = ContactUploader::split_unresolved(&contacts);

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].name, "Ana");
        assert_eq!(missing.len(), 2);
        assert!(missing
            .iter()
            .all(|e| matches!(e, SyncError::MissingForeignKey { .. })));
    }
}
