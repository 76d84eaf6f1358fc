//! Sync orchestration
//!
//! One run walks validate -> identity -> zones -> contacts. The owner lock is
//! held from identity resolution until the run finishes, so two runs for the
//! same owner never interleave their zone upserts.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::contacts::ContactUploader;
use super::lock::OwnerLocks;
use super::zones::ZoneResolver;
use super::SyncState;
use crate::config::{FailurePolicy, SyncConfig};
use crate::error::{RemoteError, Result, SyncError, SyncFailure};
use crate::identity::IdentityResolver;
use crate::models::{Contact, GroupFailure, StagedContact, SyncBatch, SyncReport, Zone};
use crate::observability::{SyncLogger, SyncMetrics};
use crate::remote::{RemoteContactStore, RemoteStore, RemoteZoneStore};

/// Drives sync runs against one remote store
///
/// The orchestrator is shareable: runs for different owners may proceed at
/// once, runs for the same owner queue on the owner lock.
pub struct SyncOrchestrator {
    identity: Arc<dyn IdentityResolver>,
    zones: ZoneResolver,
    contacts: ContactUploader,
    config: SyncConfig,
    locks: OwnerLocks,
    metrics: Option<SyncMetrics>,
    logger: SyncLogger,
    state: watch::Sender<SyncState>,
}

impl SyncOrchestrator {
    pub fn new(
        identity: Arc<dyn IdentityResolver>,
        zone_store: Arc<dyn RemoteZoneStore>,
        contact_store: Arc<dyn RemoteContactStore>,
        config: SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            identity,
            zones: ZoneResolver::new(zone_store, config.remote_timeout),
            contacts: ContactUploader::new(contact_store, config.remote_timeout),
            config,
            locks: OwnerLocks::new(),
            metrics: None,
            logger: SyncLogger::default(),
            state,
        }
    }

    /// Build an orchestrator whose zones and contacts live in the same store
    pub fn with_store<S>(
        identity: Arc<dyn IdentityResolver>,
        store: Arc<S>,
        config: SyncConfig,
    ) -> Self
    where
        S: RemoteStore + 'static,
    {
        Self::new(identity, store.clone(), store, config)
    }

    /// Share a lock table with other orchestrators hitting the same backend
    pub fn with_locks(mut self, locks: OwnerLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_logger(mut self, logger: SyncLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Progress updates; the value is the latest state entered by any run
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Run one sync to completion
    ///
    /// On failure, writes acknowledged before the failing step stay
    /// committed remotely; nothing is rolled back.
    pub async fn sync(&self, batch: &SyncBatch) -> std::result::Result<SyncReport, SyncFailure> {
        let started = Instant::now();
        let (progress, _) = watch::channel(SyncState::Idle);
        let result = self.run(batch, &progress).await;
        self.finish(result, started)
    }

    /// Run one sync, abandoning it as soon as `cancel` resolves
    ///
    /// A cancelled run stops issuing calls; a call already in flight may
    /// still land on the backend.
    pub async fn sync_until<C>(
        &self,
        batch: &SyncBatch,
        cancel: C,
    ) -> std::result::Result<SyncReport, SyncFailure>
    where
        C: Future<Output = ()>,
    {
        let started = Instant::now();
        let (progress, _) = watch::channel(SyncState::Idle);
        tokio::select! {
            biased;
            _ = cancel => {
                let stage = *progress.borrow();
                debug!(stage = %stage, "Sync cancelled by caller");
                self.finish(Err(SyncFailure::new(stage, SyncError::Cancelled)), started)
            }
            result = self.run(batch, &progress) => self.finish(result, started),
        }
    }

    fn enter(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    /// `progress` tracks this run alone; the shared channel may be ahead of it
    async fn run(
        &self,
        batch: &SyncBatch,
        progress: &watch::Sender<SyncState>,
    ) -> std::result::Result<SyncReport, SyncFailure> {
        let fail = |stage: SyncState| move |error: SyncError| SyncFailure::new(stage, error);
        let enter = |state: SyncState| {
            progress.send_replace(state);
            self.enter(state);
        };

        enter(SyncState::Validating);
        batch.validate().map_err(fail(SyncState::Validating))?;

        enter(SyncState::ResolvingIdentity);
        let owner_id = self
            .resolve_owner()
            .await
            .map_err(fail(SyncState::ResolvingIdentity))?;

        let _guard = self.locks.acquire(&owner_id).await;
        self.logger.log_sync_started(&owner_id, batch);

        if batch.is_empty() {
            debug!(owner = %owner_id, "Empty batch, nothing to sync");
            return Ok(SyncReport::empty());
        }

        enter(SyncState::UpsertingZones);
        let zones = self
            .zones
            .resolve(&owner_id, &batch.zones)
            .await
            .map_err(fail(SyncState::UpsertingZones))?;
        self.logger
            .log_zones_resolved(&owner_id, batch.zones.len(), zones.len());

        if let Some(metrics) = &self.metrics {
            metrics.record_zones_upserted(batch.zones.len());
        }

        let mut report = SyncReport::empty();
        report.zones_uploaded = batch.zones.len();
        report.zones = zones;

        enter(SyncState::ContactUpload);
        self.upload_flat(&owner_id, &batch.contacts, &mut report)
            .await
            .map_err(fail(SyncState::ContactUpload))?;

        // Empty groups still resolve their zone name; only the upsert is skipped
        let groups: Vec<(&String, &Vec<StagedContact>)> = batch.contacts_by_zone.iter().collect();

        let uploaded = if self.config.max_concurrent_groups > 1 && groups.len() > 1 {
            self.upload_groups_concurrently(&owner_id, groups, &mut report)
                .await
        } else {
            self.upload_groups(&owner_id, groups, &mut report).await
        };
        uploaded.map_err(fail(SyncState::ContactUpload))?;

        report.completed_at = Utc::now();
        Ok(report)
    }

    async fn resolve_owner(&self) -> Result<String> {
        let limit = self.config.remote_timeout;
        match tokio::time::timeout(limit, self.identity.current_owner_id()).await {
            Ok(owner) => Ok(owner?),
            Err(_) => Err(SyncError::remote(
                "resolve identity",
                RemoteError::Timeout(limit),
            )),
        }
    }

    async fn upload_flat(
        &self,
        owner_id: &str,
        contacts: &[StagedContact],
        report: &mut SyncReport,
    ) -> Result<()> {
        if contacts.is_empty() {
            return Ok(());
        }

        let outcome = match self.config.failure_policy {
            FailurePolicy::FailFast => self.contacts.upload_flat(owner_id, contacts).await,
            FailurePolicy::BestEffort => {
                let (ready, missing) = ContactUploader::split_unresolved(contacts);
                for error in missing {
                    self.record_group_failure(owner_id, None, error, report)?;
                }
                self.contacts.upload_flat(owner_id, &ready).await
            }
        };

        match outcome {
            Ok(rows) => {
                self.logger.log_group_uploaded(owner_id, None, rows.len());
                report.contacts_uploaded += rows.len();
                report.contacts = rows;
                Ok(())
            }
            Err(error) => self.record_group_failure(owner_id, None, error, report),
        }
    }

    /// Groups in zone-name order, one at a time
    async fn upload_groups(
        &self,
        owner_id: &str,
        groups: Vec<(&String, &Vec<StagedContact>)>,
        report: &mut SyncReport,
    ) -> Result<()> {
        for (zone_name, contacts) in groups {
            match self
                .contacts
                .upload_group(owner_id, zone_name, contacts, &report.zones)
                .await
            {
                Ok(rows) => self.record_group_rows(owner_id, zone_name, rows, report),
                Err(error) => {
                    self.record_group_failure(owner_id, Some(zone_name), error, report)?
                }
            }
        }
        Ok(())
    }

    /// Groups uploaded by up to `max_concurrent_groups` tasks
    ///
    /// Under fail-fast the first failure aborts the tasks still pending;
    /// groups that already finished stay committed.
    async fn upload_groups_concurrently(
        &self,
        owner_id: &str,
        groups: Vec<(&String, &Vec<StagedContact>)>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_groups));
        let zones: Arc<BTreeMap<String, Zone>> = Arc::new(report.zones.clone());
        let committed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for (zone_name, contacts) in groups {
            let permits = permits.clone();
            let zones = zones.clone();
            let uploader = self.contacts.clone();
            let owner_id = owner_id.to_string();
            let zone_name = zone_name.clone();
            let contacts = contacts.clone();
            let committed = committed.clone();

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        uploader
                            .upload_group(&owner_id, &zone_name, &contacts, &zones)
                            .await
                    }
                    Err(_) => Err(SyncError::Cancelled),
                };
                if let Ok(rows) = &result {
                    committed.fetch_add(rows.len(), Ordering::Relaxed);
                }
                (zone_name, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (zone_name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    tasks.abort_all();
                    return Err(SyncError::RemoteUnavailable {
                        operation: "upload contact group".to_string(),
                        reason: e.to_string(),
                    });
                }
            };

            match result {
                Ok(rows) => self.record_group_rows(owner_id, &zone_name, rows, report),
                Err(error) => {
                    if let Err(error) =
                        self.record_group_failure(owner_id, Some(&zone_name), error, report)
                    {
                        tasks.abort_all();
                        warn!(
                            owner = %owner_id,
                            zone = %zone_name,
                            committed = committed.load(Ordering::Relaxed),
                            "Contact group failed, aborting pending groups"
                        );
                        return Err(error);
                    }
                }
            }
        }
        Ok(())
    }

    fn record_group_rows(
        &self,
        owner_id: &str,
        zone_name: &str,
        rows: Vec<Contact>,
        report: &mut SyncReport,
    ) {
        self.logger
            .log_group_uploaded(owner_id, Some(zone_name), rows.len());
        report.contacts_uploaded += rows.len();
        report.grouped_contacts.insert(zone_name.to_string(), rows);
    }

    /// Keep going under best-effort, hand the error back under fail-fast
    fn record_group_failure(
        &self,
        owner_id: &str,
        zone_name: Option<&str>,
        error: SyncError,
        report: &mut SyncReport,
    ) -> Result<()> {
        match self.config.failure_policy {
            FailurePolicy::FailFast => Err(error),
            FailurePolicy::BestEffort => {
                self.logger.log_group_failed(owner_id, zone_name, &error);
                if let Some(metrics) = &self.metrics {
                    metrics.record_error(&error);
                }
                report
                    .failures
                    .push(GroupFailure::new(zone_name.map(str::to_string), &error));
                Ok(())
            }
        }
    }

    fn finish(
        &self,
        result: std::result::Result<SyncReport, SyncFailure>,
        started: Instant,
    ) -> std::result::Result<SyncReport, SyncFailure> {
        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(report) => {
                self.enter(SyncState::Completed);
                if let Some(metrics) = &self.metrics {
                    metrics.observe_duration(elapsed);
                    metrics.record_report(report);
                }
                if report.is_partial() {
                    warn!(failures = report.failures.len(), "Sync finished with failed groups");
                }
                self.logger.log_sync_completed(report, elapsed);
            }
            Err(failure) => {
                self.enter(SyncState::Failed);
                if let Some(metrics) = &self.metrics {
                    metrics.observe_duration(elapsed);
                    metrics.record_failure(failure);
                }
                self.logger.log_sync_failed(failure, elapsed);
            }
        }
        result
    }
}
