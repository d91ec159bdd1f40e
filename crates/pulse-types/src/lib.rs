//! Shared incident data model for Pulse ingestion, storage, and analytics.

mod enrichment;
mod window;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use enrichment::{
    is_escalation_entry, EnrichmentRules, DEFAULT_RESOLUTION_TEAM_LITERAL,
    DEFAULT_ROOT_CAUSE_TAXONOMY, ESCALATION_LOG_ENTRY_TYPE,
};
pub use window::{
    incident_offset, parse_api_timestamp, timestamp_to_text, to_incident_time, today,
    IngestWindow, WindowError, INCIDENT_OFFSET_HOURS,
};

/// Error returned when a status string is outside the PagerDuty domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("unknown incident status '{0}'")]
    UnknownStatus(String),
    #[error("unknown incident urgency '{0}'")]
    UnknownUrgency(String),
}

/// Lifecycle state reported by PagerDuty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Triggered,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    /// Parses a PagerDuty status string, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "triggered" => Some(Self::Triggered),
            "acknowledged" => Some(Self::Acknowledged),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    /// Returns true while the incident still needs a responder.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Triggered | Self::Acknowledged)
    }

    pub fn is_resolved(self) -> bool {
        self == Self::Resolved
    }
}

impl std::str::FromStr for IncidentStatus {
    type Err = RecordError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| RecordError::UnknownStatus(value.to_string()))
    }
}

/// Incident urgency; PagerDuty treats anything unspecified as low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Low,
    High,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for Urgency {
    type Err = RecordError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "high" => Ok(Self::High),
            _ => Err(RecordError::UnknownUrgency(value.to_string())),
        }
    }
}

/// Normalized incident joined from the incident, log-entry, and custom-field APIs.
///
/// Every timestamp carries the fixed UTC-7 offset returned by [`incident_offset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub title: String,
    pub service_id: String,
    pub service_name: String,
    pub status: IncidentStatus,
    pub urgency: Urgency,
    pub priority: Option<String>,
    pub description: Option<String>,
    pub escalation_policy_id: Option<String>,
    pub escalation_policy_name: Option<String>,
    pub created_at: DateTime<FixedOffset>,
    pub acknowledged_at: Option<DateTime<FixedOffset>>,
    pub resolved_at: Option<DateTime<FixedOffset>>,
    /// Escalated at least once; never cleared by later ingestion.
    pub escalated: bool,
    pub resolved_by_resolution_team: bool,
    pub root_cause: Option<String>,
    pub updated_at: DateTime<FixedOffset>,
}

impl IncidentRecord {
    /// Creates a record with derived flags at their defaults.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        service_id: impl Into<String>,
        service_name: impl Into<String>,
        status: IncidentStatus,
        created_at: DateTime<FixedOffset>,
    ) -> Self {
        let created_at = to_incident_time(created_at);
        Self {
            id: id.into(),
            title: title.into(),
            service_id: service_id.into(),
            service_name: service_name.into(),
            status,
            urgency: Urgency::Low,
            priority: None,
            description: None,
            escalation_policy_id: None,
            escalation_policy_name: None,
            created_at,
            acknowledged_at: None,
            resolved_at: None,
            escalated: false,
            resolved_by_resolution_team: false,
            root_cause: None,
            updated_at: created_at,
        }
    }

    /// Calendar date of creation in the incident offset.
    pub fn created_date(&self) -> NaiveDate {
        to_incident_time(self.created_at).date_naive()
    }

    pub fn has_root_cause(&self) -> bool {
        self.root_cause
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty())
    }

    /// Applies the re-ingestion rule against the previously stored copy.
    ///
    /// Every field comes from `self` except `escalated`, which is OR-ed with
    /// the prior value so an escalation can never be forgotten.
    pub fn absorb_prior(&mut self, prior: &IncidentRecord) {
        debug_assert_eq!(self.id, prior.id);
        self.escalated |= prior.escalated;
    }
}
