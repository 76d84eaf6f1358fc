//! Sync and remote-store configuration
//!
//! Both structs load from `ZSYNC_`-prefixed environment variables through the
//! `config` crate and fall back to defaults for anything unset.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "ZSYNC";

/// What to do when a contact group fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// First failure aborts the rest of the run
    #[default]
    FailFast,
    /// Contact-stage failures are recorded and the remaining groups continue
    BestEffort,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail-fast"),
            FailurePolicy::BestEffort => write!(f, "best-effort"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-fast" => Ok(FailurePolicy::FailFast),
            "best-effort" => Ok(FailurePolicy::BestEffort),
            other => anyhow::bail!("unknown failure policy '{}'", other),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Deadline for every individual remote call
    pub remote_timeout: Duration,
    pub failure_policy: FailurePolicy,
    /// Contact groups uploaded at once; 1 keeps uploads strictly ordered
    pub max_concurrent_groups: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            failure_policy: FailurePolicy::FailFast,
            max_concurrent_groups: 1,
        }
    }
}

impl SyncConfig {
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn max_concurrent_groups(mut self, n: usize) -> Self {
        self.max_concurrent_groups = n.max(1);
        self
    }

    /// Load from `ZSYNC_REMOTE_TIMEOUT_SECS`, `ZSYNC_FAILURE_POLICY`,
    /// `ZSYNC_MAX_CONCURRENT_GROUPS`
    pub fn from_env() -> Result<Self> {
        let settings: EnvSettings = load_env()?;
        let defaults = Self::default();

        let failure_policy = match settings.failure_policy {
            Some(raw) => raw.parse()?,
            None => defaults.failure_policy,
        };

        Ok(Self {
            remote_timeout: settings
                .remote_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.remote_timeout),
            failure_policy,
            max_concurrent_groups: settings
                .max_concurrent_groups
                .unwrap_or(defaults.max_concurrent_groups)
                .max(1),
        })
    }
}

/// Connection settings for the PostgREST/GoTrue backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Project URL, e.g. "https://project.supabase.co"
    pub api_url: String,
    /// Public (anon) API key sent as `apikey`
    pub api_key: String,
    /// Session access token; `None` means no active session
    pub access_token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            access_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RemoteConfig {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Load from `ZSYNC_API_URL`, `ZSYNC_API_KEY`, `ZSYNC_ACCESS_TOKEN`,
    /// `ZSYNC_REQUEST_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        let settings: EnvSettings = load_env()?;
        let defaults = Self::default();

        Ok(Self {
            api_url: settings.api_url.unwrap_or(defaults.api_url),
            api_key: settings.api_key.unwrap_or(defaults.api_key),
            access_token: settings.access_token.filter(|t| !t.is_empty()),
            request_timeout: settings
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        })
    }
}

/// Raw environment view shared by both configs
#[derive(Debug, Default, Deserialize)]
struct EnvSettings {
    remote_timeout_secs: Option<u64>,
    failure_policy: Option<String>,
    max_concurrent_groups: Option<usize>,
    api_url: Option<String>,
    api_key: Option<String>,
    access_token: Option<String>,
    request_timeout_secs: Option<u64>,
}

fn load_env() -> Result<EnvSettings> {
    let config = config::Config::builder()
        .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()
        .context("Failed to read environment configuration")?;

    config
        .try_deserialize()
        .context("Invalid ZSYNC_* environment configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.remote_timeout, Duration::from_secs(10));
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.max_concurrent_groups, 1);
    }

    #[test]
    fn test_builder_clamps_concurrency() {
        let config = SyncConfig::default()
            .max_concurrent_groups(0)
            .failure_policy(FailurePolicy::BestEffort);
        assert_eq!(config.max_concurrent_groups, 1);
        assert_eq!(config.failure_policy, FailurePolicy::BestEffort);
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("fail-fast".parse::<FailurePolicy>().unwrap(), FailurePolicy::FailFast);
        assert_eq!("BEST_EFFORT".parse::<FailurePolicy>().unwrap(), FailurePolicy::BestEffort);
        assert!("sometimes".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::BestEffort.to_string(), "best-effort");
    }

    #[test]
    fn test_remote_config_builder() {
        let config = RemoteConfig::new("https://example.supabase.co", "anon").with_access_token("jwt");
        assert_eq!(config.api_url, "https://example.supabase.co");
        assert_eq!(config.access_token.as_deref(), Some("jwt"));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
