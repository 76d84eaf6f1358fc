//! Config show/set commands

use anyhow::{bail, Result};
use serde::Serialize;
use tabled::Tabled;

use crate::config::{mask, Config};
use crate::output::{print_success, print_table, OutputFormat};

/// Row for settings table
#[derive(Tabled, Serialize)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    setting: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn rows(config: &Config) -> Vec<SettingRow> {
    let show = |value: &Option<String>, secret: bool| match value {
        Some(v) if secret => mask(v),
        Some(v) => v.clone(),
        None => "(unset)".to_string(),
    };

    vec![
        SettingRow {
            setting: "api_url".to_string(),
            value: show(&config.api_url, false),
        },
        SettingRow {
            setting: "api_key".to_string(),
            value: show(&config.api_key, true),
        },
        SettingRow {
            setting: "access_token".to_string(),
            value: show(&config.access_token, true),
        },
    ]
}

/// Show the stored settings, secrets masked
pub fn show_config(format: OutputFormat) -> Result<()> {
    let config = Config::load()?;
    if let OutputFormat::Table = format {
        println!("Config file: {}", Config::config_path()?.display());
    }
    print_table(&rows(&config), format);
    Ok(())
}

/// Merge the given values into the stored settings
pub fn set_config(updates: Config) -> Result<()> {
    if updates == Config::default() {
        bail!("Nothing to set: pass --api-url, --api-key or --access-token");
    }

    let mut config = Config::load()?;
    config.merge(&updates);
    let path = config.save()?;
    print_success(&format!("Saved settings to {}", path.display()));
    Ok(())
}
