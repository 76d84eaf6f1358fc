//! Sync command

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use sync_lib::{
    FailurePolicy, GoTrueIdentity, IdentityResolver, InMemoryStore, PostgrestClient, RemoteConfig,
    StaticIdentity, SyncBatch, SyncConfig, SyncMetrics, SyncOrchestrator, SyncReport,
};
use tabled::Tabled;
use tracing::info;

use crate::output::{
    color_kind, format_id, print_info, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

/// Owner used by `--dry-run` when `--owner` is not given
const DRY_RUN_OWNER: &str = "dry-run-owner";

/// Arguments of `zsync sync`
pub struct SyncArgs {
    pub batch: PathBuf,
    pub policy: Option<String>,
    pub concurrency: Option<usize>,
    pub dry_run: bool,
    pub owner: Option<String>,
    pub write_back: Option<PathBuf>,
    pub metrics: bool,
}

/// Row for the uploaded groups table
#[derive(Tabled, Serialize)]
struct GroupRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Zone ID")]
    zone_id: String,
    #[tabled(rename = "Contacts")]
    contacts: usize,
}

/// Row for the failed groups table
#[derive(Tabled, Serialize)]
struct FailureRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Sync configuration from `ZSYNC_*` variables, then flags
fn sync_config(args: &SyncArgs) -> Result<SyncConfig> {
    let mut config = SyncConfig::from_env()?;
    if let Some(policy) = &args.policy {
        let policy: FailurePolicy = policy.parse()?;
        config = config.failure_policy(policy);
    }
    if let Some(concurrency) = args.concurrency {
        config = config.max_concurrent_groups(concurrency);
    }
    Ok(config)
}

fn build_orchestrator(
    args: &SyncArgs,
    remote: &RemoteConfig,
    config: SyncConfig,
) -> Result<SyncOrchestrator> {
    if args.dry_run {
        let owner = args
            .owner
            .clone()
            .unwrap_or_else(|| DRY_RUN_OWNER.to_string());
        info!(owner = %owner, "Dry run against an in-memory store");
        return Ok(SyncOrchestrator::with_store(
            Arc::new(StaticIdentity::new(owner)),
            Arc::new(InMemoryStore::new()),
            config,
        ));
    }

    let client = PostgrestClient::new(remote).context("Failed to create backend client")?;
    let identity: Arc<dyn IdentityResolver> = match &args.owner {
        Some(owner) => Arc::new(StaticIdentity::new(owner.clone())),
        None => Arc::new(GoTrueIdentity::new(remote).context("Failed to create auth client")?),
    };
    Ok(SyncOrchestrator::with_store(identity, Arc::new(client), config))
}

/// Run one sync of the batch file
pub async fn run_sync(args: SyncArgs, remote: &RemoteConfig, format: OutputFormat) -> Result<()> {
    let mut batch = SyncBatch::from_json_file(&args.batch)?;
    let config = sync_config(&args)?;
    let metrics = args.metrics.then(SyncMetrics::new);

    let mut orchestrator = build_orchestrator(&args, remote, config)?;
    if let Some(metrics) = &metrics {
        orchestrator = orchestrator.with_metrics(metrics.clone());
    }

    let cancel = async {
        // Without a signal handler, never cancel
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let outcome = orchestrator.sync_until(&batch, cancel).await;

    let report = match outcome {
        Ok(report) => report,
        Err(failure) => {
            if let Some(metrics) = &metrics {
                println!("{}", metrics.render());
            }
            return Err(failure.into());
        }
    };

    print_report(&report, format);

    if let Some(path) = &args.write_back {
        let applied = batch.apply_remote_ids(&report);
        batch.to_json_file(path)?;
        if matches!(format, OutputFormat::Table) {
            print_success(&format!(
                "Wrote batch with {} new remote ids to {}",
                applied,
                path.display()
            ));
        }
    }

    if let Some(metrics) = &metrics {
        println!("{}", metrics.render());
    }

    Ok(())
}

fn print_report(report: &SyncReport, format: OutputFormat) {
    if let OutputFormat::Json = format {
        print_json(report);
        return;
    }

    println!("{}", "Sync Summary".bold());
    println!("{}", "=".repeat(50));
    println!("Zones upserted:         {}", report.zones_uploaded);
    println!("Zones on backend:       {}", report.zones.len());
    println!(
        "Contacts upserted:      {}",
        report.contacts_uploaded.to_string().green()
    );
    println!(
        "Completed at:           {}",
        report.completed_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
    );
    println!();

    let mut rows = Vec::new();
    if !report.contacts.is_empty() {
        rows.push(GroupRow {
            group: "(flat)".to_string(),
            zone_id: "-".to_string(),
            contacts: report.contacts.len(),
        });
    }
    rows.extend(report.grouped_contacts.iter().map(|(zone, contacts)| GroupRow {
        group: zone.clone(),
        zone_id: format_id(report.zones.get(zone).and_then(|z| z.id)),
        contacts: contacts.len(),
    }));

    if rows.is_empty() {
        print_info("No contacts uploaded");
    } else {
        print_table(&rows, OutputFormat::Table);
    }

    if report.is_partial() {
        println!();
        print_warning(&format!("{} group(s) failed", report.failures.len()));
        let failures: Vec<FailureRow> = report
            .failures
            .iter()
            .map(|f| FailureRow {
                group: f.group.clone().unwrap_or_else(|| "(flat)".to_string()),
                kind: color_kind(&f.kind),
                error: f.error.clone(),
            })
            .collect();
        print_table(&failures, OutputFormat::Table);
    } else {
        print_success("Sync completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(policy: Option<&str>, concurrency: Option<usize>) -> SyncArgs {
        SyncArgs {
            batch: PathBuf::from("batch.json"),
            policy: policy.map(str::to_string),
            concurrency,
            dry_run: true,
            owner: None,
            write_back: None,
            metrics: false,
        }
    }

    #[test]
    fn test_flags_override_config() {
        let config = sync_config(&args(Some("best-effort"), Some(4))).unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::BestEffort);
        assert_eq!(config.max_concurrent_groups, 4);
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(sync_config(&args(Some("sometimes"), None)).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_orchestrator_syncs_in_memory() {
        let orchestrator =
            build_orchestrator(&args(None, None), &RemoteConfig::default(), SyncConfig::default())
                .unwrap();
        let batch = SyncBatch::new(vec![sync_lib::StagedZone::new("Centro")])
            .with_group("Centro", vec![sync_lib::StagedContact::new("Ana")]);

        let report = orchestrator.sync(&batch).await.unwrap();
        assert_eq!(report.contacts_uploaded, 1);
    }
}
