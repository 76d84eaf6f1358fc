//! Identity command

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use sync_lib::{GoTrueIdentity, IdentityError, IdentityResolver, RemoteConfig};

use crate::output::{print_json, OutputFormat};

/// Owner id of the session in `remote`
pub async fn resolve_owner(remote: &RemoteConfig) -> Result<String> {
    let identity = GoTrueIdentity::new(remote).context("Failed to create auth client")?;
    match identity.current_owner_id().await {
        Ok(owner) => Ok(owner),
        Err(IdentityError::NoSession) => Err(anyhow!(
            "No active session: set an access token with `zsync config set --access-token` or ZSYNC_ACCESS_TOKEN"
        )),
        Err(e) => Err(e).context("Failed to resolve identity"),
    }
}

/// Print the owner id of the current session
pub async fn show_owner(remote: &RemoteConfig, format: OutputFormat) -> Result<()> {
    let owner = resolve_owner(remote).await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "owner_id": owner })),
        OutputFormat::Table => {
            println!("Owner:                  {}", owner.cyan());
            println!("Backend:                {}", remote.api_url);
        }
    }

    Ok(())
}
