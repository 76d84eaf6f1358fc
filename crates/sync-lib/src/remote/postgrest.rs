//! PostgREST (Supabase REST) adapter for the remote store

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{Filter, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::RemoteError;

/// Upsert preference: merge on conflict, echo stored rows, absent columns take defaults
const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=representation,missing=default";

/// HTTP client for the PostgREST endpoint of a project
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    client: Client,
    base_url: Url,
    api_key: String,
    access_token: Option<String>,
}

impl PostgrestClient {
    /// Create a new client
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: base_url(&config.api_url)?,
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
        })
    }

    /// Get the project base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(&format!("rest/v1/{}", table))
            .map_err(|e| RemoteError::Transport(format!("invalid table url: {}", e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request.header("apikey", &self.api_key).bearer_auth(bearer)
    }
}

#[async_trait]
impl RemoteStore for PostgrestClient {
    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Value>,
        conflict_keys: &[&str],
    ) -> Result<Vec<Value>, RemoteError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.table_url(table)?;
        url.query_pairs_mut()
            .append_pair("on_conflict", &conflict_keys.join(","))
            .append_pair("columns", &column_list(&rows));

        debug!(table = %table, rows = rows.len(), "POST upsert");

        let response = self
            .authorize(self.client.post(url))
            .header("Prefer", UPSERT_PREFER)
            .json(&rows)
            .send()
            .await
            .map_err(transport_error)?;

        read_rows(response).await
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, RemoteError> {
        let mut url = self.table_url(table)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            for (column, value) in filter.conditions() {
                pairs.append_pair(column, &format!("eq.{}", value));
            }
        }

        debug!(table = %table, "GET query");

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        read_rows(response).await
    }
}

/// Build the shared reqwest client
pub(crate) fn http_client(config: &RemoteConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Parse the project URL, making sure relative joins keep its path
pub(crate) fn base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("Invalid API URL: {}", raw))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Union of the row keys, sorted
///
/// PostgREST rejects a bulk body whose objects have different keys unless
/// `columns` names them; rows missing a column then take its default.
fn column_list(rows: &[Value]) -> String {
    let columns: BTreeSet<&str> = rows
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();
    columns.into_iter().collect::<Vec<_>>().join(",")
}

pub(crate) fn transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

async fn read_rows(response: Response) -> Result<Vec<Value>, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_failure(status, body));
    }

    let body = response.text().await.map_err(transport_error)?;
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
}

/// 409 and SQLSTATE class 23 (integrity constraint) bodies are rejections
fn classify_failure(status: StatusCode, body: String) -> RemoteError {
    let constraint = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("code").and_then(Value::as_str).map(str::to_string))
        .map(|code| code.starts_with("23"))
        .unwrap_or(false);

    if status == StatusCode::CONFLICT || constraint {
        RemoteError::Rejected(body)
    } else {
        RemoteError::Http {
            status: status.as_u16(),
            body,
        }
    }
}
