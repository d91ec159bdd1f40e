//! Ingestion run orchestration: service fan-out, batching, cancellation, retention.

pub mod config;

use pulse_source::{into_batches, EnrichedIncident, IncidentSource, ServiceDirectory, SourceError};
use pulse_store::{IncidentStore, StoreError};
use pulse_types::{IncidentRecord, IngestWindow};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub use config::{ConfigError, PulseConfig, ServiceEntry};

/// Phase of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Fetching,
    Enriching,
    Persisting,
    Failed,
}

impl RunPhase {
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Self::Idle, Self::Fetching)
                | (Self::Fetching, Self::Enriching)
                | (Self::Fetching, Self::Idle)
                | (Self::Enriching, Self::Persisting)
                | (Self::Persisting, Self::Enriching)
                | (Self::Persisting, Self::Fetching)
                | (Self::Persisting, Self::Idle)
                | (Self::Failed, Self::Idle)
                | (_, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Enriching => "enriching",
            Self::Persisting => "persisting",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no services configured")]
    NoServices,
    #[error("service '{0}' is not configured")]
    UnknownService(String),
    #[error("PagerDuty rejected the credentials: {0}")]
    Unauthorized(#[source] SourceError),
    #[error("invalid run phase transition: {from:?} -> {to:?}")]
    InvalidTransition { from: RunPhase, to: RunPhase },
    #[error(transparent)]
    Source(SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SourceError> for OrchestratorError {
    fn from(error: SourceError) -> Self {
        if error.is_fatal() {
            Self::Unauthorized(error)
        } else {
            Self::Source(error)
        }
    }
}

/// Runtime settings for ingestion runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    /// Pause between consecutive batches of one service.
    pub batch_pause: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: config::DEFAULT_BATCH_SIZE,
            batch_pause: Duration::from_millis(config::DEFAULT_BATCH_PAUSE_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceSelector {
    All,
    One(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub selector: ServiceSelector,
    pub window: IngestWindow,
    /// When set, retention cleanup runs after a run that was not cancelled.
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Per-service result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceOutcome {
    pub service_id: String,
    pub service_name: String,
    pub status: ServiceStatus,
    pub fetched: usize,
    pub rejected: usize,
    pub persisted: usize,
    pub escalated: usize,
    /// Incidents persisted with at least one enrichment gap.
    pub degraded: usize,
    pub batches: usize,
    pub error: Option<String>,
}

impl ServiceOutcome {
    fn new(service_id: &str, service_name: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            service_name: service_name.to_string(),
            status: ServiceStatus::Completed,
            fetched: 0,
            rejected: 0,
            persisted: 0,
            escalated: 0,
            degraded: 0,
            batches: 0,
            error: None,
        }
    }

    fn failed(mut self, error: impl ToString) -> Self {
        self.status = ServiceStatus::Failed;
        self.error = Some(error.to_string());
        self
    }
}

/// Aggregate outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<ServiceOutcome>,
    pub cleaned_up: Option<usize>,
    /// Set when retention cleanup ran and failed; ingested batches stay committed.
    pub cleanup_error: Option<String>,
    pub cancelled: bool,
    pub final_phase: RunPhase,
}

impl RunSummary {
    pub fn total_persisted(&self) -> usize {
        self.outcomes.iter().map(|outcome| outcome.persisted).sum()
    }

    pub fn failed_services(&self) -> impl Iterator<Item = &ServiceOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == ServiceStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed_services().next().is_some()
    }

    pub fn cleanup_failed(&self) -> bool {
        self.cleanup_error.is_some()
    }
}

struct PhaseTracker {
    phase: RunPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
        }
    }

    fn advance(&mut self, next: RunPhase) -> Result<(), OrchestratorError> {
        if !self.phase.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        if self.phase != next {
            debug!(from = self.phase.as_str(), to = next.as_str(), "run phase");
        }
        self.phase = next;
        Ok(())
    }

    fn fail(&mut self) {
        self.phase = RunPhase::Failed;
    }
}

fn cancel_requested(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Sleeps for `pause`, returning early once cancellation is requested.
async fn pause_unless_cancelled(pause: Duration, cancel: &mut watch::Receiver<bool>) {
    if pause.is_zero() || cancel_requested(cancel) {
        return;
    }
    let sleep = tokio::time::sleep(pause);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return,
            changed = cancel.changed() => {
                if changed.is_err() {
                    // Sender gone; cancellation can no longer arrive.
                    (&mut sleep).await;
                    return;
                }
                if cancel_requested(cancel) {
                    return;
                }
            }
        }
    }
}

/// Drives ingestion from an [`IncidentSource`] into an [`IncidentStore`].
pub struct Orchestrator {
    source: Arc<dyn IncidentSource>,
    store: Arc<dyn IncidentStore>,
    services: ServiceDirectory,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn IncidentSource>,
        store: Arc<dyn IncidentStore>,
        services: ServiceDirectory,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            source,
            store,
            services,
            config,
        }
    }

    fn select_services(&self, selector: &ServiceSelector) -> Result<Vec<String>, OrchestratorError> {
        if self.services.is_empty() {
            return Err(OrchestratorError::NoServices);
        }
        match selector {
            ServiceSelector::All => Ok(self.services.ids().map(str::to_string).collect()),
            ServiceSelector::One(service_id) if self.services.contains(service_id) => {
                Ok(vec![service_id.clone()])
            }
            ServiceSelector::One(service_id) => {
                Err(OrchestratorError::UnknownService(service_id.clone()))
            }
        }
    }

    fn service_name<'a>(&'a self, service_id: &'a str) -> &'a str {
        self.services.name_for(service_id).unwrap_or(service_id)
    }

    /// Runs one ingestion pass. Services run in sequence and fail independently;
    /// only credential errors abort the whole run.
    pub async fn run(
        &self,
        request: RunRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RunSummary, OrchestratorError> {
        let selected = self.select_services(&request.selector)?;
        let mut tracker = PhaseTracker::new();
        let mut outcomes = Vec::with_capacity(selected.len());
        let mut cancelled = false;

        info!(
            services = selected.len(),
            start = %request.window.start,
            end = %request.window.end,
            "starting ingestion run"
        );

        for service_id in &selected {
            let service_name = self.service_name(service_id);
            if cancelled || cancel_requested(&cancel) {
                cancelled = true;
                let mut outcome = ServiceOutcome::new(service_id, service_name);
                outcome.status = ServiceStatus::Cancelled;
                outcomes.push(outcome);
                continue;
            }

            let outcome = match self
                .ingest_service(service_id, &request.window, &mut tracker, &mut cancel)
                .await
            {
                Ok(outcome) => outcome,
                Err(fatal) => {
                    tracker.fail();
                    error!(service_id = %service_id, error = %fatal, "aborting ingestion run");
                    return Err(fatal);
                }
            };
            cancelled |= outcome.status == ServiceStatus::Cancelled;
            outcomes.push(outcome);
        }

        let mut cleaned_up = None;
        let mut cleanup_error = None;
        match request.retention_days {
            Some(days) if !cancelled => match self.store.cleanup(days).await {
                Ok(deleted) => {
                    info!(retention_days = days, deleted, "retention cleanup finished");
                    cleaned_up = Some(deleted);
                }
                Err(error) => {
                    error!(retention_days = days, error = %error, "retention cleanup failed");
                    tracker.fail();
                    cleanup_error = Some(error.to_string());
                }
            },
            Some(_) => warn!("run cancelled; skipping retention cleanup"),
            None => {}
        }

        if cleanup_error.is_none() {
            tracker.advance(RunPhase::Idle)?;
        }
        let summary = RunSummary {
            outcomes,
            cleaned_up,
            cleanup_error,
            cancelled,
            final_phase: tracker.phase,
        };
        info!(
            persisted = summary.total_persisted(),
            failed = summary.failed_services().count(),
            cancelled,
            cleanup_failed = summary.cleanup_failed(),
            "ingestion run finished"
        );
        Ok(summary)
    }

    /// Ingests one service. `Err` is reserved for failures that must end the run.
    async fn ingest_service(
        &self,
        service_id: &str,
        window: &IngestWindow,
        tracker: &mut PhaseTracker,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<ServiceOutcome, OrchestratorError> {
        let mut outcome = ServiceOutcome::new(service_id, self.service_name(service_id));
        tracker.advance(RunPhase::Fetching)?;

        let listing = match self.source.list_incidents(service_id, window).await {
            Ok(listing) => listing,
            Err(error) if error.is_fatal() => return Err(OrchestratorError::Unauthorized(error)),
            Err(error) => {
                error!(service_id, error = %error, "failed to list incidents");
                return Ok(outcome.failed(error));
            }
        };

        outcome.fetched = listing.records.len();
        outcome.rejected = listing.rejected.len();
        info!(
            service_id,
            fetched = outcome.fetched,
            rejected = outcome.rejected,
            "listed incidents"
        );

        let batches = into_batches(listing.records, self.config.batch_size);
        let batch_count = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 {
                pause_unless_cancelled(self.config.batch_pause, cancel).await;
            }
            if cancel_requested(cancel) {
                info!(
                    service_id,
                    completed_batches = index,
                    batch_count,
                    "cancellation requested; stopping before next batch"
                );
                outcome.status = ServiceStatus::Cancelled;
                break;
            }

            tracker.advance(RunPhase::Enriching)?;
            let enriched = match self.source.enrich_batch(batch).await {
                Ok(enriched) => enriched,
                Err(error) if error.is_fatal() => {
                    return Err(OrchestratorError::Unauthorized(error));
                }
                Err(error) => {
                    error!(service_id, batch = index + 1, error = %error, "batch enrichment failed");
                    return Ok(outcome.failed(error));
                }
            };
            outcome.degraded += enriched.iter().filter(|item| item.is_degraded()).count();
            outcome.escalated += enriched.iter().filter(|item| item.record.escalated).count();
            let records: Vec<IncidentRecord> =
                enriched.into_iter().map(|item| item.record).collect();

            tracker.advance(RunPhase::Persisting)?;
            match self.store.upsert(&records).await {
                Ok(written) => {
                    outcome.persisted += written;
                    outcome.batches += 1;
                    info!(
                        service_id,
                        batch = index + 1,
                        batch_count,
                        written,
                        "persisted batch"
                    );
                }
                Err(error) => {
                    error!(service_id, batch = index + 1, error = %error, "batch write rolled back");
                    return Ok(outcome.failed(error));
                }
            }
        }

        Ok(outcome)
    }

    /// Re-fetches one incident and upserts it, returning the stored copy.
    pub async fn refresh_incident(
        &self,
        incident_id: &str,
    ) -> Result<EnrichedIncident, OrchestratorError> {
        let fetched = self.source.fetch_incident(incident_id).await?;
        self.store.upsert(std::slice::from_ref(&fetched.record)).await?;
        let record = self
            .store
            .get(incident_id)
            .await?
            .unwrap_or(fetched.record);
        Ok(EnrichedIncident {
            record,
            gaps: fetched.gaps,
        })
    }
}
