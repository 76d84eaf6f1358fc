//! Owner identity resolution
//!
//! Every remote row is scoped by the owner id this module resolves. The sync
//! asks for it once per run.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::RemoteConfig;
use crate::error::{IdentityError, RemoteError};
use crate::remote::postgrest::{base_url, http_client, transport_error};

/// Source of the current authenticated owner
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Current owner id, or `NoSession` when nobody is signed in
    async fn current_owner_id(&self) -> Result<String, IdentityError>;
}

/// Fixed owner, for dry runs and tests
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    owner_id: String,
}

impl StaticIdentity {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
        }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentity {
    async fn current_owner_id(&self) -> Result<String, IdentityError> {
        Ok(self.owner_id.clone())
    }
}

/// Session holder the surrounding app signs in and out of
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    owner_id: Arc<RwLock<Option<String>>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(owner_id: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(owner_id);
        session
    }

    pub fn sign_in(&self, owner_id: impl Into<String>) {
        let mut guard = self.owner_id.write().unwrap_or_else(|p| p.into_inner());
        *guard = Some(owner_id.into());
    }

    pub fn sign_out(&self) {
        let mut guard = self.owner_id.write().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    pub fn is_signed_in(&self) -> bool {
        self.owner_id
            .read()
            .map(|g| g.is_some())
            .unwrap_or_else(|p| p.into_inner().is_some())
    }
}

#[async_trait]
impl IdentityResolver for SessionIdentity {
    async fn current_owner_id(&self) -> Result<String, IdentityError> {
        let guard = self.owner_id.read().unwrap_or_else(|p| p.into_inner());
        guard
            .as_ref()
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or(IdentityError::NoSession)
    }
}

/// Owner resolved from a GoTrue (Supabase Auth) access token
#[derive(Debug, Clone)]
pub struct GoTrueIdentity {
    client: Client,
    base_url: Url,
    api_key: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

impl GoTrueIdentity {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: base_url(&config.api_url)?,
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl IdentityResolver for GoTrueIdentity {
    async fn current_owner_id(&self) -> Result<String, IdentityError> {
        let token = self
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(IdentityError::NoSession)?;

        let url = self
            .base_url
            .join("auth/v1/user")
            .map_err(|e| RemoteError::Transport(format!("invalid auth url: {}", e)))?;

        let response = self
            .client
            .get(url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(status = status.as_u16(), "Access token rejected");
            return Err(IdentityError::NoSession);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let user: AuthUser = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        if user.id.is_empty() {
            return Err(IdentityError::NoSession);
        }
        Ok(user.id)
    }
}
