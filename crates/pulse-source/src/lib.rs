//! PagerDuty incident retrieval and enrichment.

mod pagerduty;
pub mod retry;
mod types;
mod wire;

use async_trait::async_trait;
use pulse_types::{IncidentRecord, IngestWindow};

pub use pagerduty::{
    PagerDutyAuthScheme, PagerDutyClient, PagerDutyConfig, DEFAULT_API_BASE,
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_REQUEST_TIMEOUT_MS, PAGE_LIMIT,
};
pub use retry::RetryPolicy;
pub use types::{
    service_id_from_url, EnrichedIncident, EnrichmentGap, IncidentListing, RejectedIncident,
    ServiceDirectory, SourceError, SourceResult,
};

/// Number of incidents enriched concurrently before the next group starts.
pub const ENRICHMENT_BATCH_SIZE: usize = 20;

/// Splits records into consecutive batches of at most `size`, preserving order.
pub fn into_batches(records: Vec<IncidentRecord>, size: usize) -> Vec<Vec<IncidentRecord>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(size));
    let mut pending = records;
    while !pending.is_empty() {
        let rest = pending.split_off(pending.len().min(size));
        batches.push(pending);
        pending = rest;
    }
    batches
}

#[async_trait]
/// Upstream incident API as seen by ingestion.
pub trait IncidentSource: Send + Sync {
    /// Lists every incident a service created inside the window, across all pages.
    ///
    /// Incidents that cannot be mapped are returned in `rejected` rather than failing the call.
    async fn list_incidents(
        &self,
        service_id: &str,
        window: &IngestWindow,
    ) -> SourceResult<IncidentListing>;

    /// Enriches one batch concurrently. Degraded calls are recorded as gaps;
    /// only a fatal error such as rejected credentials fails the batch.
    async fn enrich_batch(
        &self,
        batch: Vec<IncidentRecord>,
    ) -> SourceResult<Vec<EnrichedIncident>>;

    async fn fetch_incident(&self, incident_id: &str) -> SourceResult<EnrichedIncident>;

    /// Lists and enriches a window in batches of [`ENRICHMENT_BATCH_SIZE`].
    async fn fetch_window(
        &self,
        service_id: &str,
        window: &IngestWindow,
    ) -> SourceResult<Vec<EnrichedIncident>> {
        let listing = self.list_incidents(service_id, window).await?;
        let mut enriched = Vec::with_capacity(listing.records.len());
        for batch in into_batches(listing.records, ENRICHMENT_BATCH_SIZE) {
            enriched.extend(self.enrich_batch(batch).await?);
        }
        Ok(enriched)
    }
}
