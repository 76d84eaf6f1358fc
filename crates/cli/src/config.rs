//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sync_lib::RemoteConfig;

/// Persistent CLI settings, overridden by flags and `ZSYNC_*` variables
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Backend project URL
    pub api_url: Option<String>,
    /// Public API key
    pub api_key: Option<String>,
    /// Session access token
    pub access_token: Option<String>,
}

impl Config {
    /// Load configuration from the default file
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("zsync").join("config.json"))
    }

    /// Overlay explicit values on top of the stored ones
    pub fn merge(&mut self, overrides: &Config) {
        if overrides.api_url.is_some() {
            self.api_url = overrides.api_url.clone();
        }
        if overrides.api_key.is_some() {
            self.api_key = overrides.api_key.clone();
        }
        if overrides.access_token.is_some() {
            self.access_token = overrides.access_token.clone();
        }
    }

    /// Connection settings; unset fields fall back to the library defaults
    pub fn remote(&self) -> RemoteConfig {
        let defaults = RemoteConfig::default();
        RemoteConfig {
            api_url: self.api_url.clone().unwrap_or(defaults.api_url),
            api_key: self.api_key.clone().unwrap_or(defaults.api_key),
            access_token: self.access_token.clone().filter(|t| !t.is_empty()),
            request_timeout: defaults.request_timeout,
        }
    }
}

/// Show a secret as its last four characters
pub fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            api_url: Some("https://demo.supabase.co".to_string()),
            api_key: Some("anon".to_string()),
            access_token: None,
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let mut config = Config {
            api_url: Some("https://stored.example".to_string()),
            api_key: Some("stored-key".to_string()),
            access_token: None,
        };
        config.merge(&Config {
            api_url: None,
            api_key: Some("flag-key".to_string()),
            access_token: Some("jwt".to_string()),
        });

        let remote = config.remote();
        assert_eq!(remote.api_url, "https://stored.example");
        assert_eq!(remote.api_key, "flag-key");
        assert_eq!(remote.access_token.as_deref(), Some("jwt"));
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("abc"), "****");
        assert_eq!(mask("eyJhbGciOi1234"), "****1234");
    }
}
