//! Zone listing command

use anyhow::{Context, Result};
use serde::Serialize;
use sync_lib::{PostgrestClient, RemoteConfig, RemoteZoneStore, Zone};
use tabled::Tabled;

use super::whoami::resolve_owner;
use crate::output::{format_id, format_timestamp, print_json, print_table, OutputFormat};

/// Row for zones table
#[derive(Tabled, Serialize)]
struct ZoneRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&Zone> for ZoneRow {
    fn from(zone: &Zone) -> Self {
        Self {
            id: format_id(zone.id),
            name: zone.name.clone(),
            description: zone.description.clone().unwrap_or_default(),
            updated: format_timestamp(zone.updated_at.or(zone.created_at)),
        }
    }
}

/// List the owner's zones, sorted by name
pub async fn list_zones(
    remote: &RemoteConfig,
    owner: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let owner = match owner {
        Some(owner) => owner,
        None => resolve_owner(remote).await?,
    };

    let client = PostgrestClient::new(remote).context("Failed to create backend client")?;
    let mut zones = client
        .zones_for_owner(&owner)
        .await
        .context("Failed to list zones")?;
    zones.sort_by(|a, b| a.name.cmp(&b.name));

    match format {
        OutputFormat::Json => print_json(&zones),
        OutputFormat::Table => {
            let rows: Vec<ZoneRow> = zones.iter().map(ZoneRow::from).collect();
            print_table(&rows, format);
        }
    }

    Ok(())
}
