//! Observability for sync runs
//!
//! Provides:
//! - Prometheus metrics (run duration, outcomes, upserted rows, remote errors)
//! - Structured logging of sync lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::{SyncError, SyncFailure};
use crate::models::{SyncBatch, SyncReport};

/// Histogram buckets for run duration (in seconds)
const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SyncMetricsInner> = OnceLock::new();

struct SyncMetricsInner {
    sync_duration_seconds: Histogram,
    sync_runs: IntCounterVec,
    zones_upserted: IntCounter,
    contacts_upserted: IntCounter,
    remote_errors: IntCounterVec,
}

impl SyncMetricsInner {
    fn new() -> Self {
        Self {
            sync_duration_seconds: register_histogram!(
                "zone_sync_duration_seconds",
                "Wall time of one sync run",
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register zone_sync_duration_seconds"),

            sync_runs: register_int_counter_vec!(
                "zone_sync_runs_total",
                "Sync runs by outcome",
                &["outcome"]
            )
            .expect("Failed to register zone_sync_runs_total"),

            zones_upserted: register_int_counter!(
                "zone_sync_zones_upserted_total",
                "Zones submitted to the remote store"
            )
            .expect("Failed to register zone_sync_zones_upserted_total"),

            contacts_upserted: register_int_counter!(
                "zone_sync_contacts_upserted_total",
                "Contacts acknowledged by the remote store"
            )
            .expect("Failed to register zone_sync_contacts_upserted_total"),

            remote_errors: register_int_counter_vec!(
                "zone_sync_remote_errors_total",
                "Failed remote calls by operation",
                &["operation"]
            )
            .expect("Failed to register zone_sync_remote_errors_total"),
        }
    }
}

/// Handle to the process-wide sync metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct SyncMetrics {
    _private: (),
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SyncMetricsInner {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new)
    }

    pub fn observe_duration(&self, duration_secs: f64) {
        self.inner().sync_duration_seconds.observe(duration_secs);
    }

    /// Count zones as soon as their upsert is acknowledged
    pub fn record_zones_upserted(&self, count: usize) {
        self.inner().zones_upserted.inc_by(count as u64);
    }

    /// Record a finished run
    pub fn record_report(&self, report: &SyncReport) {
        let outcome = if report.is_partial() { "partial" } else { "completed" };
        self.inner().sync_runs.with_label_values(&[outcome]).inc();
        self.inner()
            .contacts_upserted
            .inc_by(report.contacts_uploaded as u64);
    }

    /// Record a failed run
    pub fn record_failure(&self, failure: &SyncFailure) {
        self.inner()
            .sync_runs
            .with_label_values(&[failure.error.kind()])
            .inc();
        self.record_error(&failure.error);
    }

    /// Count a remote error, if the error came from the store
    pub fn record_error(&self, error: &SyncError) {
        if let SyncError::RemoteUnavailable { operation, .. } = error {
            self.inner()
                .remote_errors
                .with_label_values(&[operation.as_str()])
                .inc();
        }
    }

    pub fn runs(&self, outcome: &str) -> u64 {
        self.inner().sync_runs.with_label_values(&[outcome]).get()
    }

    pub fn zones_upserted(&self) -> u64 {
        self.inner().zones_upserted.get()
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for sync events
#[derive(Debug, Clone)]
pub struct SyncLogger {
    device: String,
}

impl Default for SyncLogger {
    fn default() -> Self {
        Self::new("local")
    }
}

impl SyncLogger {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn log_sync_started(&self, owner_id: &str, batch: &SyncBatch) {
        info!(
            event = "sync_started",
            device = %self.device,
            owner = %owner_id,
            zones = batch.zones.len(),
            flat_contacts = batch.contacts.len(),
            groups = batch.contacts_by_zone.len(),
            "Starting zone/contact sync"
        );
    }

    pub fn log_zones_resolved(&self, owner_id: &str, staged: usize, resolved: usize) {
        info!(
            event = "zones_resolved",
            device = %self.device,
            owner = %owner_id,
            staged = staged,
            resolved = resolved,
            "Resolved remote zones"
        );
    }

    pub fn log_group_uploaded(&self, owner_id: &str, zone: Option<&str>, rows: usize) {
        info!(
            event = "contact_group_uploaded",
            device = %self.device,
            owner = %owner_id,
            zone = zone.unwrap_or("-"),
            rows = rows,
            "Uploaded contact group"
        );
    }

    pub fn log_group_failed(&self, owner_id: &str, zone: Option<&str>, error: &SyncError) {
        warn!(
            event = "contact_group_failed",
            device = %self.device,
            owner = %owner_id,
            zone = zone.unwrap_or("-"),
            kind = error.kind(),
            error = %error,
            "Contact group failed, continuing"
        );
    }

    pub fn log_sync_completed(&self, report: &SyncReport, elapsed_secs: f64) {
        info!(
            event = "sync_completed",
            device = %self.device,
            zones_uploaded = report.zones_uploaded,
            contacts_uploaded = report.contacts_uploaded,
            failures = report.failures.len(),
            elapsed_secs = elapsed_secs,
            "Sync completed"
        );
    }

    pub fn log_sync_failed(&self, failure: &SyncFailure, elapsed_secs: f64) {
        warn!(
            event = "sync_failed",
            device = %self.device,
            stage = %failure.stage,
            kind = failure.error.kind(),
            error = %failure.error,
            elapsed_secs = elapsed_secs,
            "Sync failed, writes acknowledged before the failure remain committed"
        );
    }
}
