use pulse_types::IncidentRecord;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates failures raised while talking to PagerDuty.
pub enum SourceError {
    #[error("missing PagerDuty API token")]
    MissingToken,
    #[error("PagerDuty rejected the API token (status {status})")]
    Unauthorized { status: u16 },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("PagerDuty returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid incident payload: {0}")]
    InvalidPayload(String),
    #[error("invalid header value: {0}")]
    InvalidHeader(String),
    #[error("request limiter closed")]
    LimiterClosed,
}

impl SourceError {
    /// Errors that no amount of retrying or per-service isolation can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingToken | Self::Unauthorized { .. } | Self::InvalidHeader(_)
        )
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Enrichment call that fell back to defaults after exhausting retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrichmentGap {
    LogEntries,
    CustomFields,
}

impl EnrichmentGap {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LogEntries => "log_entries",
            Self::CustomFields => "custom_fields",
        }
    }
}

/// A record after the log-entry and custom-field calls have run.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedIncident {
    pub record: IncidentRecord,
    pub gaps: Vec<EnrichmentGap>,
}

impl EnrichedIncident {
    pub fn is_degraded(&self) -> bool {
        !self.gaps.is_empty()
    }
}

/// Incident returned by the API that could not be mapped to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedIncident {
    pub id: String,
    pub reason: String,
}

/// All incidents one service produced in a window, before enrichment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentListing {
    pub records: Vec<IncidentRecord>,
    pub rejected: Vec<RejectedIncident>,
}

/// Known services keyed by PagerDuty service id, valued by display name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDirectory {
    services: BTreeMap<String, String>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service; a later name for the same id replaces the earlier one.
    pub fn insert(&mut self, service_id: impl Into<String>, name: impl Into<String>) {
        self.services.insert(service_id.into(), name.into());
    }

    pub fn name_for(&self, service_id: &str) -> Option<&str> {
        self.services.get(service_id).map(String::as_str)
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.services.contains_key(service_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.services
            .iter()
            .map(|(id, name)| (id.as_str(), name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for ServiceDirectory
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut directory = Self::new();
        for (id, name) in iter {
            directory.insert(id, name);
        }
        directory
    }
}

/// Extracts the trailing seven-character service id from a PagerDuty service URL.
///
/// `https://acme.pagerduty.com/service-directory/PHMCGNE` yields `PHMCGNE`.
pub fn service_id_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let candidate = trimmed.rsplit('/').next()?;
    let is_id = candidate.len() == 7
        && candidate
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit());
    is_id.then(|| candidate.to_string())
}
