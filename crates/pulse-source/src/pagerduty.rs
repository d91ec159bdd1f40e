use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use pulse_types::{to_incident_time, EnrichmentRules, IncidentRecord, IngestWindow};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::retry::{is_retryable_http_error, new_request_id, parse_retry_after_ms, RetryPolicy};
use crate::wire::{
    into_record, CustomFieldSummary, CustomFieldValues, IncidentEnvelope, IncidentsPage,
    LogEntriesPage,
};
use crate::{
    EnrichedIncident, EnrichmentGap, IncidentListing, IncidentSource, RejectedIncident,
    ServiceDirectory, SourceError, SourceResult,
};

pub const DEFAULT_API_BASE: &str = "https://api.pagerduty.com";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 20;
/// Page size for every paginated PagerDuty endpoint.
pub const PAGE_LIMIT: usize = 100;
const ACCEPT_HEADER_VALUE: &str = "application/vnd.pagerduty+json;version=2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// How the API token is presented in the `Authorization` header.
pub enum PagerDutyAuthScheme {
    /// `Token token=<key>`, used by REST API keys.
    #[default]
    Token,
    /// `Bearer <token>`, used by OAuth access tokens.
    Bearer,
}

#[derive(Debug, Clone)]
pub struct PagerDutyConfig {
    pub api_base: String,
    pub api_token: String,
    pub auth_scheme: PagerDutyAuthScheme,
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Upper bound on concurrent HTTP requests across all enrichment calls.
    pub max_in_flight: usize,
    pub services: ServiceDirectory,
    pub rules: EnrichmentRules,
}

impl PagerDutyConfig {
    pub fn new(api_token: impl Into<String>, services: ServiceDirectory) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_token: api_token.into(),
            auth_scheme: PagerDutyAuthScheme::default(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry: RetryPolicy::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            services,
            rules: EnrichmentRules::default(),
        }
    }
}

/// Outcome of one GET after retries.
enum ApiBody {
    Text(String),
    NotFound,
}

#[derive(Debug, Clone)]
/// REST client for the PagerDuty v2 incidents API.
pub struct PagerDutyClient {
    client: reqwest::Client,
    config: PagerDutyConfig,
    permits: Arc<Semaphore>,
}

impl PagerDutyClient {
    pub fn new(config: PagerDutyConfig) -> SourceResult<Self> {
        let token = config.api_token.trim();
        if token.is_empty() {
            return Err(SourceError::MissingToken);
        }

        let credential = match config.auth_scheme {
            PagerDutyAuthScheme::Token => format!("Token token={token}"),
            PagerDutyAuthScheme::Bearer => format!("Bearer {token}"),
        };
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HEADER_VALUE));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&credential)
                .map_err(|e| SourceError::InvalidHeader(format!("authorization: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));

        Ok(Self {
            client,
            config,
            permits,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}{path}")
    }

    async fn get_body(&self, path: &str, query: &[(&str, String)]) -> SourceResult<ApiBody> {
        let url = self.endpoint(path);
        let policy = self.config.retry;

        for attempt in 0..policy.max_attempts.max(1) {
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| SourceError::LimiterClosed)?;
            let response = self
                .client
                .get(&url)
                .query(query)
                .header("x-pulse-request-id", new_request_id())
                .header("x-pulse-retry-attempt", attempt.to_string())
                .send()
                .await;

            let (error, retry_after_ms) = match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(ApiBody::Text(response.text().await?));
                    }
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(SourceError::Unauthorized {
                            status: status.as_u16(),
                        });
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Ok(ApiBody::NotFound);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    (
                        SourceError::HttpStatus {
                            status: status.as_u16(),
                            body,
                        },
                        retry_after_ms,
                    )
                }
                Err(error) if is_retryable_http_error(&error) => (SourceError::Http(error), None),
                Err(error) => return Err(SourceError::Http(error)),
            };
            drop(permit);

            if !policy.allows_retry_after(attempt) || !policy.is_retryable(&error) {
                return Err(error);
            }
            let delay = policy.delay(attempt, retry_after_ms);
            warn!(
                path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "PagerDuty request failed; retrying"
            );
            sleep(delay).await;
        }

        Err(SourceError::InvalidPayload(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> SourceResult<T> {
        match self.get_body(path, query).await? {
            ApiBody::Text(raw) => Ok(serde_json::from_str(&raw)?),
            ApiBody::NotFound => Err(SourceError::HttpStatus {
                status: StatusCode::NOT_FOUND.as_u16(),
                body: format!("{path} not found"),
            }),
        }
    }

    /// Like [`Self::get_json`], but a 404 or blank body yields the default value.
    async fn get_json_or_default<T: DeserializeOwned + Default>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> SourceResult<T> {
        match self.get_body(path, query).await? {
            ApiBody::Text(raw) if raw.trim().is_empty() => Ok(T::default()),
            ApiBody::Text(raw) => Ok(serde_json::from_str(&raw)?),
            ApiBody::NotFound => Ok(T::default()),
        }
    }

    /// Walks the incident's log entries until an escalation appears or pages run out.
    async fn fetch_escalated(&self, incident_id: &str) -> SourceResult<bool> {
        let path = format!("/incidents/{incident_id}/log_entries");
        let mut offset = 0_usize;
        loop {
            let query = [
                ("limit", PAGE_LIMIT.to_string()),
                ("offset", offset.to_string()),
                ("include[]", "channels".to_string()),
                ("is_overview", "false".to_string()),
            ];
            let page: LogEntriesPage = self.get_json_or_default(&path, &query).await?;
            if page.has_escalation() {
                return Ok(true);
            }
            let count = page.log_entries.len();
            if !page.more || count == 0 {
                return Ok(false);
            }
            offset += count;
        }
    }

    async fn fetch_custom_fields(&self, incident_id: &str) -> SourceResult<CustomFieldSummary> {
        let path = format!("/incidents/{incident_id}/custom_fields/values");
        let values: CustomFieldValues = self.get_json_or_default(&path, &[]).await?;
        Ok(CustomFieldSummary::from(values))
    }

    /// Runs both enrichment calls concurrently; a failed call leaves defaults and a gap.
    /// Rejected credentials are returned instead, since every later call would fail too.
    async fn enrich(&self, mut record: IncidentRecord) -> SourceResult<EnrichedIncident> {
        let (escalated, fields) = tokio::join!(
            self.fetch_escalated(&record.id),
            self.fetch_custom_fields(&record.id)
        );
        let mut gaps = Vec::new();

        match escalated {
            Ok(escalated) => record.escalated = escalated,
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => {
                warn!(
                    incident_id = %record.id,
                    error = %error,
                    "log entries unavailable; escalated left false"
                );
                gaps.push(EnrichmentGap::LogEntries);
            }
        }

        match fields {
            Ok(fields) => {
                record.resolved_by_resolution_team =
                    self.config.rules.resolved_by_team(fields.resolution.as_deref());
                record.root_cause = self
                    .config
                    .rules
                    .classify_root_cause(fields.prelim_root_cause.as_deref());
            }
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => {
                warn!(
                    incident_id = %record.id,
                    error = %error,
                    "custom fields unavailable; resolution and root cause left empty"
                );
                gaps.push(EnrichmentGap::CustomFields);
            }
        }

        Ok(EnrichedIncident { record, gaps })
    }
}

#[async_trait]
impl IncidentSource for PagerDutyClient {
    async fn list_incidents(
        &self,
        service_id: &str,
        window: &IngestWindow,
    ) -> SourceResult<IncidentListing> {
        let since = window.since().to_rfc3339();
        let until = window.until().to_rfc3339();
        let fetched_at = to_incident_time(Utc::now());
        let mut listing = IncidentListing::default();
        let mut seen = HashSet::new();
        let mut offset = 0_usize;

        loop {
            let query = [
                ("service_ids[]", service_id.to_string()),
                ("since", since.clone()),
                ("until", until.clone()),
                ("limit", PAGE_LIMIT.to_string()),
                ("offset", offset.to_string()),
                ("sort_by", "created_at:desc".to_string()),
            ];
            let page: IncidentsPage = self.get_json("/incidents", &query).await?;
            let count = page.incidents.len();
            debug!(service_id, offset, count, more = page.more, "fetched incident page");

            for raw in page.incidents {
                let id = raw.id.clone();
                // Offset paging can repeat an incident when new ones arrive mid-walk.
                if !seen.insert(id.clone()) {
                    continue;
                }
                match into_record(raw, &self.config.services, Some(service_id), fetched_at) {
                    Ok(record) => listing.records.push(record),
                    Err(error) => {
                        warn!(service_id, incident_id = %id, error = %error, "rejected incident");
                        listing.rejected.push(RejectedIncident {
                            id,
                            reason: error.to_string(),
                        });
                    }
                }
            }

            if !page.more || count == 0 {
                break;
            }
            offset += count;
        }

        Ok(listing)
    }

    async fn enrich_batch(
        &self,
        batch: Vec<IncidentRecord>,
    ) -> SourceResult<Vec<EnrichedIncident>> {
        join_all(batch.into_iter().map(|record| self.enrich(record)))
            .await
            .into_iter()
            .collect()
    }

    async fn fetch_incident(&self, incident_id: &str) -> SourceResult<EnrichedIncident> {
        let envelope: IncidentEnvelope = self
            .get_json(&format!("/incidents/{incident_id}"), &[])
            .await?;
        let record = into_record(
            envelope.incident,
            &self.config.services,
            None,
            to_incident_time(Utc::now()),
        )?;
        self.enrich(record).await
    }
}
