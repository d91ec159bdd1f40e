use std::fmt::Write as _;
use std::path::Path;

use pulse_analytics::{ServiceMetrics, SummaryMetrics};
use pulse_orchestrator::{RunSummary, ServiceStatus};
use pulse_source::EnrichedIncident;
use pulse_store::StoreStats;
use pulse_types::{timestamp_to_text, IncidentRecord};

fn flag(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn service_status_label(status: ServiceStatus) -> &'static str {
    match status {
        ServiceStatus::Completed => "completed",
        ServiceStatus::Failed => "failed",
        ServiceStatus::Cancelled => "cancelled",
    }
}

pub(crate) fn render_run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "ingestion run: services={} persisted={} failed={} cancelled={} phase={}",
        summary.outcomes.len(),
        summary.total_persisted(),
        summary.failed_services().count(),
        summary.cancelled,
        summary.final_phase.as_str()
    );
    for outcome in &summary.outcomes {
        let _ = write!(
            out,
            "  {} ({}): status={} fetched={} rejected={} persisted={} escalated={} degraded={} batches={}",
            outcome.service_name,
            outcome.service_id,
            service_status_label(outcome.status),
            outcome.fetched,
            outcome.rejected,
            outcome.persisted,
            outcome.escalated,
            outcome.degraded,
            outcome.batches
        );
        if let Some(error) = &outcome.error {
            let _ = write!(out, " error={error}");
        }
        out.push('\n');
    }
    if let Some(deleted) = summary.cleaned_up {
        let _ = writeln!(out, "retention cleanup: deleted={deleted}");
    }
    if let Some(error) = &summary.cleanup_error {
        let _ = writeln!(out, "retention cleanup: failed error={error}");
    }
    out
}

pub(crate) fn render_summary(summary: &SummaryMetrics, top: &[ServiceMetrics]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "incident summary {} .. {}", summary.start, summary.end);
    let _ = writeln!(
        out,
        "  total={} open={} resolved={} escalated={} escalation_rate={:.2}%",
        summary.total, summary.open, summary.resolved, summary.escalated, summary.escalation_rate
    );
    let _ = writeln!(
        out,
        "  resolved_by_resolution_team={} root_cause_attributed={}",
        summary.resolved_by_resolution_team, summary.root_cause_attributed
    );
    if !summary.services.is_empty() {
        out.push_str("services:\n");
        for service in &summary.services {
            let _ = writeln!(
                out,
                "  {} ({}): total={} open={} escalated={} escalation_rate={:.2}%",
                service.service_name,
                service.service_id,
                service.total,
                service.open,
                service.escalated,
                service.escalation_rate
            );
        }
    }
    if !top.is_empty() {
        out.push_str("top escalated:\n");
        for (rank, service) in top.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. {} escalated={}",
                rank + 1,
                service.service_name,
                service.escalated
            );
        }
    }
    out.push_str("daily:\n");
    for day in &summary.daily {
        let _ = writeln!(
            out,
            "  {} total={} escalated={}",
            day.date, day.total, day.escalated
        );
    }
    out
}

pub(crate) fn render_escalations(records: &[IncidentRecord]) -> String {
    if records.is_empty() {
        return "no escalated incidents in window\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "escalated incidents: {}", records.len());
    for record in records {
        let _ = writeln!(
            out,
            "  {} {} [{}] {} policy={} title={}",
            timestamp_to_text(record.created_at),
            record.id,
            record.status.as_str(),
            record.service_name,
            record.escalation_policy_name.as_deref().unwrap_or("-"),
            record.title
        );
    }
    out
}

pub(crate) fn render_stats(stats: &StoreStats, database: &Path) -> String {
    let span = match (stats.earliest, stats.latest) {
        (Some(earliest), Some(latest)) => format!("{earliest} .. {latest}"),
        _ => "empty".to_string(),
    };
    format!(
        "database: path={} incidents={} escalated={} services={} span={}\n",
        database.display(),
        stats.total,
        stats.escalated,
        stats.service_ids.len(),
        span
    )
}

pub(crate) fn render_incident(record: &IncidentRecord) -> String {
    let optional = |value: Option<&str>| value.unwrap_or("-").to_string();
    let timestamp = |value: Option<chrono::DateTime<chrono::FixedOffset>>| {
        value.map(timestamp_to_text).unwrap_or_else(|| "-".to_string())
    };
    let mut out = String::new();
    let _ = writeln!(out, "incident {}: {}", record.id, record.title);
    let _ = writeln!(
        out,
        "  service={} ({}) status={} urgency={} priority={}",
        record.service_name,
        record.service_id,
        record.status.as_str(),
        record.urgency.as_str(),
        optional(record.priority.as_deref())
    );
    let _ = writeln!(
        out,
        "  created={} acknowledged={} resolved={}",
        timestamp_to_text(record.created_at),
        timestamp(record.acknowledged_at),
        timestamp(record.resolved_at)
    );
    let _ = writeln!(
        out,
        "  escalated={} resolved_by_resolution_team={} root_cause={}",
        flag(record.escalated),
        flag(record.resolved_by_resolution_team),
        optional(record.root_cause.as_deref())
    );
    let _ = writeln!(
        out,
        "  escalation_policy={} updated={}",
        optional(record.escalation_policy_name.as_deref()),
        timestamp_to_text(record.updated_at)
    );
    out
}

pub(crate) fn render_refresh(refreshed: &EnrichedIncident) -> String {
    let mut out = render_incident(&refreshed.record);
    if refreshed.is_degraded() {
        let gaps: Vec<&str> = refreshed.gaps.iter().map(|gap| gap.as_str()).collect();
        let _ = writeln!(out, "  enrichment gaps: {}", gaps.join(", "));
    }
    out
}
