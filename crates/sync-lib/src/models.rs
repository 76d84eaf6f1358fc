//! Core data models for zone/contact sync
//!
//! Staged types (`StagedZone`, `StagedContact`, `SyncBatch`) are what the
//! device hands in. Remote types (`Zone`, `Contact`) are decoded rows and use
//! the remote column names on the wire.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Zone row as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "user_id", default)]
    pub owner_id: Option<String>,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Contact row as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "user_id", default)]
    pub owner_id: Option<String>,
    #[serde(rename = "zona_id", default)]
    pub zone_id: Option<i64>,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "telefono", default)]
    pub phone: Option<String>,
    #[serde(rename = "asistencia", default)]
    pub attendance: Option<bool>,
    #[serde(rename = "interes", default)]
    pub interest: Option<bool>,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Zone staged on the device, keyed by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedZone {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StagedZone {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Contact staged on the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedContact {
    /// Remote id, once a previous sync has returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Remote zone id; only meaningful for the flat contact list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<i64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest: Option<bool>,
}

/// Zero and negative ids are placeholders, never real remote keys
fn real_id(id: Option<i64>) -> Option<i64> {
    id.filter(|id| *id > 0)
}

impl StagedContact {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_zone_id(mut self, zone_id: i64) -> Self {
        self.zone_id = Some(zone_id);
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_flags(mut self, attendance: bool, interest: bool) -> Self {
        self.attendance = Some(attendance);
        self.interest = Some(interest);
        self
    }

    /// Remote id if one is really assigned
    pub fn effective_id(&self) -> Option<i64> {
        real_id(self.id)
    }

    /// Zone id if it is a real foreign key rather than the unset sentinel
    pub fn effective_zone_id(&self) -> Option<i64> {
        real_id(self.zone_id)
    }

    /// Phone in its normalized 10-digit form, `None` when blank or absent
    pub fn normalized_phone(&self) -> Result<Option<String>, SyncError> {
        match self.phone.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => normalize_phone(raw).map(Some),
        }
    }
}

/// Normalize a Mexican phone number to its 10 national digits
///
/// Accepts `5551234567`, `+52 555 123 4567`, `52-555-123-4567`, `(555) 123-4567`.
pub fn normalize_phone(input: &str) -> Result<String, SyncError> {
    let compact: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();

    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    let has_plus = digits.len() != compact.len();

    let valid = digits.chars().all(|c| c.is_ascii_digit())
        && match digits.len() {
            10 => !has_plus,
            12 => digits.starts_with("52"),
            _ => false,
        };

    if !valid {
        return Err(SyncError::malformed(format!(
            "invalid phone number '{}': expected 10 digits, optionally prefixed by +52",
            input
        )));
    }

    Ok(digits[digits.len() - 10..].to_string())
}

/// One sync invocation's input, built by the caller from on-device storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBatch {
    #[serde(default)]
    pub zones: Vec<StagedZone>,
    /// Contacts that already carry a concrete zone id
    #[serde(default)]
    pub contacts: Vec<StagedContact>,
    /// Contacts addressed by zone name
    #[serde(default)]
    pub contacts_by_zone: BTreeMap<String, Vec<StagedContact>>,
}

impl SyncBatch {
    pub fn new(zones: Vec<StagedZone>) -> Self {
        Self {
            zones,
            ..Default::default()
        }
    }

    pub fn with_contacts(mut self, contacts: Vec<StagedContact>) -> Self {
        self.contacts = contacts;
        self
    }

    pub fn with_group(mut self, zone: impl Into<String>, contacts: Vec<StagedContact>) -> Self {
        self.contacts_by_zone.insert(zone.into(), contacts);
        self
    }

    /// Load a batch from a JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse batch file {:?}", path))
    }

    /// Write the batch to a JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize batch")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write batch file {:?}", path))
    }

    /// True when there is nothing to send or resolve
    ///
    /// A group with no contacts still names a zone that must exist remotely.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty() && self.contacts.is_empty() && self.contacts_by_zone.is_empty()
    }

    /// Number of contacts across both input shapes
    pub fn contact_count(&self) -> usize {
        self.contacts.len() + self.contacts_by_zone.values().map(Vec::len).sum::<usize>()
    }

    /// Reject records that can never be written, before any network call
    pub fn validate(&self) -> Result<(), SyncError> {
        let mut seen = BTreeSet::new();
        for zone in &self.zones {
            if zone.name.trim().is_empty() {
                return Err(SyncError::malformed("zone with empty name"));
            }
            if !seen.insert(zone.name.as_str()) {
                return Err(SyncError::malformed(format!(
                    "zone '{}' staged more than once",
                    zone.name
                )));
            }
        }

        for contact in &self.contacts {
            validate_contact(contact, None)?;
        }

        for (zone_name, contacts) in &self.contacts_by_zone {
            if zone_name.trim().is_empty() {
                return Err(SyncError::malformed("contact group with empty zone name"));
            }
            for contact in contacts {
                validate_contact(contact, Some(zone_name))?;
            }
        }

        Ok(())
    }

    /// Fill in remote ids returned by a sync so the next run updates in place
    ///
    /// Contacts that already have an id are left alone. Returned rows are
    /// matched by name within the same input shape and group.
    pub fn apply_remote_ids(&mut self, report: &SyncReport) -> usize {
        let mut applied = assign_ids(&mut self.contacts, &report.contacts);
        for (zone_name, contacts) in self.contacts_by_zone.iter_mut() {
            if let Some(rows) = report.grouped_contacts.get(zone_name) {
                applied += assign_ids(contacts, rows);
            }
        }
        applied
    }
}

fn validate_contact(contact: &StagedContact, group: Option<&str>) -> Result<(), SyncError> {
    if contact.name.trim().is_empty() {
        return Err(SyncError::malformed(match group {
            Some(zone) => format!("contact with empty name in zone '{}'", zone),
            None => "contact with empty name".to_string(),
        }));
    }
    contact.normalized_phone()?;
    Ok(())
}

fn assign_ids(staged: &mut [StagedContact], rows: &[Contact]) -> usize {
    let mut used = vec![false; rows.len()];
    let mut applied = 0;

    // Rows for contacts that were sent with an id are not candidates
    for contact in staged.iter() {
        if let Some(id) = contact.effective_id() {
            if let Some(pos) = rows.iter().position(|r| r.id == Some(id)) {
                used[pos] = true;
            }
        }
    }

    for contact in staged.iter_mut().filter(|c| c.effective_id().is_none()) {
        let found = rows
            .iter()
            .enumerate()
            .find(|(i, row)| !used[*i] && row.name == contact.name && row.id.is_some());
        if let Some((i, row)) = found {
            used[i] = true;
            contact.id = row.id;
            applied += 1;
        }
    }
    applied
}

/// A contact-stage failure recorded under the best-effort policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupFailure {
    /// Zone name of the failing group, `None` for the flat contact list
    pub group: Option<String>,
    pub error: String,
    pub kind: String,
}

impl GroupFailure {
    pub fn new(group: Option<String>, error: &SyncError) -> Self {
        Self {
            group,
            error: error.to_string(),
            kind: error.kind().to_string(),
        }
    }
}

/// Summary of one completed sync
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Number of zones submitted in the batch
    pub zones_uploaded: usize,
    /// Total contacts the backend acknowledged
    pub contacts_uploaded: usize,
    /// Authoritative name -> zone map read after the zone upsert
    pub zones: BTreeMap<String, Zone>,
    /// Rows returned for the flat contact list
    pub contacts: Vec<Contact>,
    /// Rows returned per named group
    pub grouped_contacts: BTreeMap<String, Vec<Contact>>,
    pub failures: Vec<GroupFailure>,
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn empty() -> Self {
        Self {
            zones_uploaded: 0,
            contacts_uploaded: 0,
            zones: BTreeMap::new(),
            contacts: Vec::new(),
            grouped_contacts: BTreeMap::new(),
            failures: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Lenient timestamp codec: RFC 3339, or a naive timestamp taken as UTC
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(ts.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Some(naive.and_utc()))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sentinel_zone_id_is_not_a_foreign_key() {
        assert_eq!(StagedContact::new("Ana").effective_zone_id(), None);
        assert_eq!(StagedContact::new("Ana").with_zone_id(0).effective_zone_id(), None);
        assert_eq!(StagedContact::new("Ana").with_zone_id(-1).effective_zone_id(), None);
        assert_eq!(StagedContact::new("Ana").with_zone_id(7).effective_zone_id(), Some(7));
    }

    #[test]
    fn test_normalize_phone_accepted_forms() {
        assert_eq!(normalize_phone("5551234567").unwrap(), "5551234567");
        assert_eq!(normalize_phone("+52 555 123 4567").unwrap(), "5551234567");
        assert_eq!(normalize_phone("52-555-123-4567").unwrap(), "5551234567");
        assert_eq!(normalize_phone("(555) 123-4567").unwrap(), "5551234567");
    }

    #[test]
    fn test_normalize_phone_rejections() {
        for bad in ["555123", "+5551234567", "44 5551234567", "555-123-456a", "+1 5551234567"] {
            assert!(
                matches!(normalize_phone(bad), Err(SyncError::MalformedPayload(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let batch = SyncBatch::new(vec![StagedZone::new("  ")]);
        assert!(matches!(batch.validate(), Err(SyncError::MalformedPayload(_))));

        let batch = SyncBatch::default().with_group("Centro", vec![StagedContact::new("")]);
        let err = batch.validate().unwrap_err();
        assert!(err.to_string().contains("Centro"));

        let batch = SyncBatch::default().with_group("", vec![StagedContact::new("Ana")]);
        assert!(batch.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_zone_names() {
        let batch = SyncBatch::new(vec![StagedZone::new("Centro"), StagedZone::new("Centro")]);
        assert!(matches!(batch.validate(), Err(SyncError::MalformedPayload(_))));
    }

    #[test]
    fn test_validate_rejects_bad_phone() {
        let batch = SyncBatch::default()
            .with_contacts(vec![StagedContact::new("Ana").with_zone_id(1).with_phone("123")]);
        assert!(matches!(batch.validate(), Err(SyncError::MalformedPayload(_))));
    }

    #[test]
    fn test_batch_with_empty_group_is_not_empty() {
        assert!(SyncBatch::default().is_empty());
        assert!(!SyncBatch::default().with_group("Centro", vec![]).is_empty());
        assert!(!SyncBatch::new(vec![StagedZone::new("Centro")]).is_empty());
    }

    #[test]
    fn test_batch_json_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(
            &path,
            r#"{
                "zones": [{"name": "Centro", "description": "Plaza"}],
                "contacts_by_zone": {
                    "Centro": [{"name": "Ana", "phone": "5551234567", "attendance": true}]
                }
            }"#,
        )
        .unwrap();

        let batch = SyncBatch::from_json_file(&path).unwrap();
        assert_eq!(batch.zones[0].description.as_deref(), Some("Plaza"));
        assert!(batch.contacts.is_empty());
        assert_eq!(batch.contacts_by_zone["Centro"][0].attendance, Some(true));
        assert_eq!(batch.contact_count(), 1);

        batch.to_json_file(&path).unwrap();
        assert_eq!(SyncBatch::from_json_file(&path).unwrap(), batch);
    }

    #[test]
    fn test_zone_decodes_remote_columns_and_timestamps() {
        let zone: Zone = serde_json::from_value(serde_json::json!({
            "id": 3,
            "user_id": "owner-1",
            "nombre": "Centro",
            "descripcion": null,
            "created_at": "2024-05-01T10:00:00.123456+00:00",
            "updated_at": "2024-05-01T10:00:00"
        }))
        .unwrap();

        assert_eq!(zone.id, Some(3));
        assert_eq!(zone.name, "Centro");
        assert!(zone.description.is_none());
        assert!(zone.created_at.is_some());
        assert!(zone.updated_at.is_some());
    }

    #[test]
    fn test_apply_remote_ids_matches_by_name() {
        let mut batch = SyncBatch::default().with_group(
            "Centro",
            vec![StagedContact::new("Ana"), StagedContact::new("Luis").with_id(9)],
        );

        let row = |id: i64, name: &str| Contact {
            id: Some(id),
            owner_id: None,
            zone_id: Some(1),
            name: name.to_string(),
            phone: None,
            attendance: None,
            interest: None,
            created_at: None,
            updated_at: None,
        };

        let mut report = SyncReport::empty();
        report
            .grouped_contacts
            .insert("Centro".to_string(), vec![row(9, "Luis"), row(10, "Ana")]);

        assert_eq!(batch.apply_remote_ids(&report), 1);
        let group = &batch.contacts_by_zone["Centro"];
        assert_eq!(group[0].id, Some(10));
        assert_eq!(group[1].id, Some(9));
    }
}
