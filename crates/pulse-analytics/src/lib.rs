//! Read-only incident metrics over an [`IncidentStore`].

use chrono::NaiveDate;
use pulse_store::{IncidentQuery, IncidentStore, StoreResult};
use pulse_types::{IncidentRecord, IncidentStatus, IngestWindow, Urgency};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Per-service slice of [`SummaryMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub service_id: String,
    pub service_name: String,
    pub total: usize,
    pub open: usize,
    pub resolved: usize,
    pub escalated: usize,
    pub escalation_rate: f64,
    pub resolved_by_resolution_team: usize,
    pub root_cause_attributed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub total: usize,
    pub escalated: usize,
}

/// Aggregate view of every incident created inside a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetrics {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: u32,
    pub total: usize,
    /// Triggered plus acknowledged.
    pub open: usize,
    pub resolved: usize,
    pub escalated: usize,
    /// Percent of incidents escalated, rounded to two decimals.
    pub escalation_rate: f64,
    pub resolved_by_resolution_team: usize,
    pub root_cause_attributed: usize,
    /// Sorted by total descending, then service id.
    pub services: Vec<ServiceMetrics>,
    /// One entry per day in the window, oldest first, zero-filled.
    pub daily: Vec<DailyCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalatedIncident {
    pub id: String,
    pub title: String,
    pub status: IncidentStatus,
    pub urgency: Urgency,
}

/// One day of a service calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub total: usize,
    pub open: usize,
    pub resolved: usize,
    pub escalated: usize,
    pub resolved_by_resolution_team: usize,
    pub root_cause_attributed: usize,
    /// Newest first.
    pub escalated_incidents: Vec<EscalatedIncident>,
}

/// Percentage with two decimals; zero when `total` is zero.
pub fn rate(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = part as f64 * 100.0 / total as f64;
    (percent * 100.0).round() / 100.0
}

#[derive(Default)]
struct Tally {
    total: usize,
    open: usize,
    resolved: usize,
    escalated: usize,
    resolved_by_resolution_team: usize,
    root_cause_attributed: usize,
}

impl Tally {
    fn add(&mut self, record: &IncidentRecord) {
        self.total += 1;
        self.open += usize::from(record.status.is_open());
        self.resolved += usize::from(record.status.is_resolved());
        self.escalated += usize::from(record.escalated);
        self.resolved_by_resolution_team += usize::from(record.resolved_by_resolution_team);
        self.root_cause_attributed += usize::from(record.has_root_cause());
    }
}

/// Builds summary metrics from records already filtered to `window`.
pub fn summarize(window: &IngestWindow, records: &[IncidentRecord]) -> SummaryMetrics {
    let mut overall = Tally::default();
    let mut by_service: HashMap<&str, (&str, Tally)> = HashMap::new();
    let mut by_day: BTreeMap<NaiveDate, DailyCount> = window
        .dates()
        .into_iter()
        .map(|date| {
            (
                date,
                DailyCount {
                    date,
                    total: 0,
                    escalated: 0,
                },
            )
        })
        .collect();

    for record in records {
        overall.add(record);
        by_service
            .entry(record.service_id.as_str())
            .or_insert_with(|| (record.service_name.as_str(), Tally::default()))
            .1
            .add(record);
        if let Some(day) = by_day.get_mut(&record.created_date()) {
            day.total += 1;
            day.escalated += usize::from(record.escalated);
        }
    }

    let mut services: Vec<ServiceMetrics> = by_service
        .into_iter()
        .map(|(service_id, (service_name, tally))| ServiceMetrics {
            service_id: service_id.to_string(),
            service_name: service_name.to_string(),
            total: tally.total,
            open: tally.open,
            resolved: tally.resolved,
            escalated: tally.escalated,
            escalation_rate: rate(tally.escalated, tally.total),
            resolved_by_resolution_team: tally.resolved_by_resolution_team,
            root_cause_attributed: tally.root_cause_attributed,
        })
        .collect();
    services.sort_by(|left, right| {
        right
            .total
            .cmp(&left.total)
            .then_with(|| left.service_id.cmp(&right.service_id))
    });

    SummaryMetrics {
        start: window.start,
        end: window.end,
        days: window.day_count(),
        total: overall.total,
        open: overall.open,
        resolved: overall.resolved,
        escalated: overall.escalated,
        escalation_rate: rate(overall.escalated, overall.total),
        resolved_by_resolution_team: overall.resolved_by_resolution_team,
        root_cause_attributed: overall.root_cause_attributed,
        services,
        daily: by_day.into_values().collect(),
    }
}

/// Per-day tallies for every day of `window`, zero-filled, from records already
/// filtered to it. Input order is kept within each day's escalated list.
pub fn calendar(window: &IngestWindow, records: &[IncidentRecord]) -> Vec<CalendarDay> {
    let mut days: BTreeMap<NaiveDate, (Tally, Vec<EscalatedIncident>)> = window
        .dates()
        .into_iter()
        .map(|date| (date, (Tally::default(), Vec::new())))
        .collect();
    for record in records {
        let Some((tally, escalated)) = days.get_mut(&record.created_date()) else {
            continue;
        };
        tally.add(record);
        if record.escalated {
            escalated.push(EscalatedIncident {
                id: record.id.clone(),
                title: record.title.clone(),
                status: record.status,
                urgency: record.urgency,
            });
        }
    }

    days.into_iter()
        .map(|(date, (tally, escalated_incidents))| CalendarDay {
            date,
            total: tally.total,
            open: tally.open,
            resolved: tally.resolved,
            escalated: tally.escalated,
            resolved_by_resolution_team: tally.resolved_by_resolution_team,
            root_cause_attributed: tally.root_cause_attributed,
            escalated_incidents,
        })
        .collect()
}

/// Read-only metrics facade over an incident store.
#[derive(Clone)]
pub struct IncidentAnalytics {
    store: Arc<dyn IncidentStore>,
}

impl IncidentAnalytics {
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self { store }
    }

    pub async fn summary(&self, window: &IngestWindow) -> StoreResult<SummaryMetrics> {
        let records = self.store.query(IncidentQuery::window(window)).await?;
        Ok(summarize(window, &records))
    }

    /// Summary restricted to one service; all counts are zero when it has no incidents.
    pub async fn service_summary(
        &self,
        window: &IngestWindow,
        service_id: &str,
    ) -> StoreResult<SummaryMetrics> {
        let records = self
            .store
            .query(IncidentQuery::window(window).for_service(service_id))
            .await?;
        Ok(summarize(window, &records))
    }

    pub async fn service_calendar(
        &self,
        window: &IngestWindow,
        service_id: &str,
    ) -> StoreResult<Vec<CalendarDay>> {
        let records = self
            .store
            .query(IncidentQuery::window(window).for_service(service_id))
            .await?;
        Ok(calendar(window, &records))
    }

    /// Services with at least one escalation, most escalations first.
    pub async fn top_escalated(
        &self,
        window: &IngestWindow,
        limit: usize,
    ) -> StoreResult<Vec<ServiceMetrics>> {
        let mut services = self.summary(window).await?.services;
        services.retain(|service| service.escalated > 0);
        services.sort_by(|left, right| {
            right
                .escalated
                .cmp(&left.escalated)
                .then_with(|| right.escalation_rate.total_cmp(&left.escalation_rate))
                .then_with(|| left.service_id.cmp(&right.service_id))
        });
        services.truncate(limit);
        Ok(services)
    }

    /// Escalated incidents in the window, newest first.
    pub async fn escalations(&self, window: &IngestWindow) -> StoreResult<Vec<IncidentRecord>> {
        self.store
            .query(IncidentQuery::window(window).escalated_only())
            .await
    }
}
