//! Upsert payload encoding
//!
//! Each optional column is encoded through [`Field`], which keeps "leave the
//! column out", "send null" and "send a value" distinct. The defaults applied
//! for values absent on the device:
//!
//! | table      | column        | absent locally            |
//! |------------|---------------|---------------------------|
//! | `zones`    | `descripcion` | `""`                      |
//! | `contacts` | `id`          | omitted (never `null`)    |
//! | `contacts` | `telefono`    | `""`                      |
//! | `contacts` | `asistencia`  | `false`                   |
//! | `contacts` | `interes`     | `false`                   |
//!
//! `user_id`, `nombre` and `zona_id` are always sent with a value; `zona_id`
//! is resolved before a contact is encoded.

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::SyncError;
use crate::models::{StagedContact, StagedZone};

pub const ZONES_TABLE: &str = "zones";
pub const CONTACTS_TABLE: &str = "contacts";

/// Natural key of a zone
pub const ZONE_CONFLICT_KEYS: &[&str] = &["user_id", "nombre"];
/// Contacts conflict on their primary key
pub const CONTACT_CONFLICT_KEYS: &[&str] = &["id"];

/// Column of the owner every row is scoped by
pub const OWNER_COLUMN: &str = "user_id";

/// Tri-state column value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Field<T> {
    /// Key omitted from the payload
    #[default]
    Unset,
    /// Explicit JSON null
    Null,
    Value(T),
}

impl<T> Field<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Field::Unset)
    }

    /// `Value` when present, `Unset` otherwise
    pub fn omit_if_none(value: Option<T>) -> Self {
        value.map_or(Field::Unset, Field::Value)
    }

    /// `Value` when present, the given default otherwise
    pub fn or_default_value(value: Option<T>, default: T) -> Self {
        Field::Value(value.unwrap_or(default))
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Value(v) => v.serialize(serializer),
            Field::Null | Field::Unset => serializer.serialize_none(),
        }
    }
}

/// One row of a zone upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZonePayload {
    pub user_id: String,
    pub nombre: String,
    #[serde(skip_serializing_if = "Field::is_unset")]
    pub descripcion: Field<String>,
}

impl ZonePayload {
    pub fn encode(owner_id: &str, zone: &StagedZone) -> Self {
        Self {
            user_id: owner_id.to_string(),
            nombre: zone.name.clone(),
            descripcion: Field::or_default_value(zone.description.clone(), String::new()),
        }
    }
}

/// One row of a contact upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactPayload {
    #[serde(skip_serializing_if = "Field::is_unset")]
    pub id: Field<i64>,
    pub user_id: String,
    pub zona_id: i64,
    pub nombre: String,
    #[serde(skip_serializing_if = "Field::is_unset")]
    pub telefono: Field<String>,
    #[serde(skip_serializing_if = "Field::is_unset")]
    pub asistencia: Field<bool>,
    #[serde(skip_serializing_if = "Field::is_unset")]
    pub interes: Field<bool>,
}

impl ContactPayload {
    /// Encode a staged contact against an already resolved zone id
    pub fn encode(owner_id: &str, zone_id: i64, contact: &StagedContact) -> Result<Self, SyncError> {
        Ok(Self {
            id: Field::omit_if_none(contact.effective_id()),
            user_id: owner_id.to_string(),
            zona_id: zone_id,
            nombre: contact.name.clone(),
            telefono: Field::or_default_value(contact.normalized_phone()?, String::new()),
            asistencia: Field::or_default_value(contact.attendance, false),
            interes: Field::or_default_value(contact.interest, false),
        })
    }
}

/// Serialize payload rows into the JSON rows the store consumes
pub fn to_rows<T: Serialize>(payloads: &[T]) -> serde_json::Result<Vec<Value>> {
    payloads.iter().map(serde_json::to_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_states_serialize_distinctly() {
        #[derive(Serialize)]
        struct Row {
            #[serde(skip_serializing_if = "Field::is_unset")]
            a: Field<i64>,
            #[serde(skip_serializing_if = "Field::is_unset")]
            b: Field<i64>,
            #[serde(skip_serializing_if = "Field::is_unset")]
            c: Field<i64>,
        }

        let row = Row {
            a: Field::Unset,
            b: Field::Null,
            c: Field::Value(0),
        };
        assert_eq!(serde_json::to_value(&row).unwrap(), json!({"b": null, "c": 0}));
    }

    #[test]
    fn test_new_contact_omits_id_and_fills_defaults() {
        let contact = StagedContact::new("Ana");
        let payload = ContactPayload::encode("owner-1", 5, &contact).unwrap();
        let row = serde_json::to_value(&payload).unwrap();

        assert_eq!(
            row,
            json!({
                "user_id": "owner-1",
                "zona_id": 5,
                "nombre": "Ana",
                "telefono": "",
                "asistencia": false,
                "interes": false
            })
        );
        assert!(row.get("id").is_none());
    }

    #[test]
    fn test_known_contact_sends_id_and_normalized_phone() {
        let contact = StagedContact::new("Ana")
            .with_id(12)
            .with_phone("+52 555 123 4567")
            .with_flags(true, false);
        let row = serde_json::to_value(ContactPayload::encode("owner-1", 5, &contact).unwrap()).unwrap();

        assert_eq!(row["id"], 12);
        assert_eq!(row["telefono"], "5551234567");
        assert_eq!(row["asistencia"], true);
        assert_eq!(row["interes"], false);
    }

    #[test]
    fn test_placeholder_contact_id_is_omitted() {
        let contact = StagedContact::new("Ana").with_id(0);
        let row = serde_json::to_value(ContactPayload::encode("o", 1, &contact).unwrap()).unwrap();
        assert!(row.get("id").is_none());
    }

    #[test]
    fn test_zone_description_defaults_to_empty() {
        let row = serde_json::to_value(ZonePayload::encode("owner-1", &StagedZone::new("Centro"))).unwrap();
        assert_eq!(
            row,
            json!({"user_id": "owner-1", "nombre": "Centro", "descripcion": ""})
        );

        let zone = StagedZone::new("Centro").with_description("Plaza");
        let rows = to_rows(&[ZonePayload::encode("owner-1", &zone)]).unwrap();
        assert_eq!(rows[0]["descripcion"], "Plaza");
    }
}
