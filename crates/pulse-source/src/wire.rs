use chrono::{DateTime, FixedOffset};
use pulse_types::{
    is_escalation_entry, parse_api_timestamp, IncidentRecord, IncidentStatus, Urgency,
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{ServiceDirectory, SourceError};

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncidentsPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub incidents: Vec<RawIncident>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub more: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncidentEnvelope {
    pub incident: RawIncident,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawIncident {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<String>,
    #[serde(
        default,
        alias = "acknowledgments",
        deserialize_with = "null_as_default"
    )]
    pub acknowledgements: Vec<RawAcknowledgement>,
    #[serde(default)]
    pub service: Option<RawReference>,
    #[serde(default)]
    pub escalation_policy: Option<RawReference>,
    #[serde(default)]
    pub priority: Option<RawReference>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawAcknowledgement {
    #[serde(default)]
    pub at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawReference {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl RawReference {
    fn display_name(&self) -> Option<String> {
        self.name
            .as_deref()
            .or(self.summary.as_deref())
            .and_then(non_blank)
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LogEntriesPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub log_entries: Vec<RawLogEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub more: bool,
}

impl LogEntriesPage {
    pub fn has_escalation(&self) -> bool {
        self.log_entries.iter().any(|entry| {
            entry
                .entry_type
                .as_deref()
                .is_some_and(is_escalation_entry)
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawLogEntry {
    #[serde(rename = "type", default)]
    pub entry_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CustomFieldValues {
    #[serde(default, deserialize_with = "null_as_default")]
    pub custom_fields: Vec<RawCustomField>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawCustomField {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub field: Option<RawFieldReference>,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawFieldReference {
    #[serde(default)]
    pub name: Option<String>,
}

impl RawCustomField {
    fn field_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| self.field.as_ref().and_then(|field| field.name.as_deref()))
    }

    /// Only string values count; anything else is treated as absent.
    fn text_value(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::String(text) => non_blank(text),
            _ => None,
        }
    }
}

/// The two custom fields enrichment reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CustomFieldSummary {
    pub resolution: Option<String>,
    pub prelim_root_cause: Option<String>,
}

impl From<CustomFieldValues> for CustomFieldSummary {
    fn from(values: CustomFieldValues) -> Self {
        let mut summary = Self::default();
        for field in values.custom_fields {
            let Some(name) = field.field_name().map(|name| name.trim().to_ascii_lowercase())
            else {
                continue;
            };
            match name.as_str() {
                "resolution" => summary.resolution = field.text_value(),
                "prelim_root_cause" => summary.prelim_root_cause = field.text_value(),
                _ => {}
            }
        }
        summary
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_timestamp(
    incident_id: &str,
    field: &str,
    value: &str,
) -> Result<DateTime<FixedOffset>, SourceError> {
    parse_api_timestamp(value).map_err(|error| {
        SourceError::InvalidPayload(format!(
            "incident {incident_id} has malformed {field} '{value}': {error}"
        ))
    })
}

/// Maps a raw incident to a record with enrichment flags at their defaults.
///
/// `fallback_service_id` covers payloads that omit the service reference.
pub(crate) fn into_record(
    raw: RawIncident,
    services: &ServiceDirectory,
    fallback_service_id: Option<&str>,
    fetched_at: DateTime<FixedOffset>,
) -> Result<IncidentRecord, SourceError> {
    let id = raw.id.trim().to_string();
    if id.is_empty() {
        return Err(SourceError::InvalidPayload(
            "incident without an id".to_string(),
        ));
    }

    let status_text = raw.status.as_deref().unwrap_or_default();
    let status = IncidentStatus::parse(status_text).ok_or_else(|| {
        SourceError::InvalidPayload(format!("incident {id} has unknown status '{status_text}'"))
    })?;

    let created_text = raw.created_at.as_deref().ok_or_else(|| {
        SourceError::InvalidPayload(format!("incident {id} is missing created_at"))
    })?;
    let created_at = parse_timestamp(&id, "created_at", created_text)?;

    let resolved_at = raw
        .resolved_at
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_timestamp(&id, "resolved_at", value))
        .transpose()?;
    let acknowledged_at = raw
        .acknowledgements
        .first()
        .and_then(|ack| ack.at.as_deref())
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_timestamp(&id, "acknowledged_at", value))
        .transpose()?;

    let service_id = raw
        .service
        .as_ref()
        .and_then(|service| service.id.as_deref())
        .and_then(non_blank)
        .or_else(|| fallback_service_id.map(str::to_string))
        .unwrap_or_default();
    let service_name = services
        .name_for(&service_id)
        .map(str::to_string)
        .or_else(|| raw.service.as_ref().and_then(RawReference::display_name))
        .unwrap_or_default();

    let title = raw
        .title
        .as_deref()
        .and_then(non_blank)
        .unwrap_or_default();
    let mut record = IncidentRecord::new(id, title, service_id, service_name, status, created_at);
    record.urgency = raw
        .urgency
        .as_deref()
        .and_then(|value| value.parse::<Urgency>().ok())
        .unwrap_or_default();
    record.priority = raw.priority.as_ref().and_then(RawReference::display_name);
    record.description = raw.description.as_deref().and_then(non_blank);
    record.escalation_policy_id = raw
        .escalation_policy
        .as_ref()
        .and_then(|policy| policy.id.as_deref())
        .and_then(non_blank);
    record.escalation_policy_name = raw
        .escalation_policy
        .as_ref()
        .and_then(RawReference::display_name);
    record.acknowledged_at = acknowledged_at;
    record.resolved_at = resolved_at;
    record.updated_at = pulse_types::to_incident_time(fetched_at);
    Ok(record)
}
