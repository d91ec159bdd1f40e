//! Incident store abstractions and in-memory backend.

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use pulse_types::{today, IncidentRecord, IngestWindow};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use sqlite::SqliteIncidentStore;

/// Result type for incident store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid incident record: {0}")]
    InvalidRecord(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Filter for reading incidents by fixed-offset creation date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentQuery {
    pub service_id: Option<String>,
    /// First creation date included.
    pub start: NaiveDate,
    /// Last creation date included.
    pub end: NaiveDate,
    pub escalated_only: bool,
}

impl IncidentQuery {
    pub fn range(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            service_id: None,
            start,
            end,
            escalated_only: false,
        }
    }

    pub fn window(window: &IngestWindow) -> Self {
        Self::range(window.start, window.end)
    }

    pub fn for_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn escalated_only(mut self) -> Self {
        self.escalated_only = true;
        self
    }

    pub fn matches(&self, record: &IncidentRecord) -> bool {
        let date = record.created_date();
        let in_range = self.start <= date && date <= self.end;
        let service_match = self
            .service_id
            .as_deref()
            .is_none_or(|service_id| record.service_id == service_id);
        in_range && service_match && (!self.escalated_only || record.escalated)
    }
}

/// Totals reported by the database-info command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub escalated: usize,
    pub service_ids: Vec<String>,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
}

/// First creation date kept when retaining `older_than_days` days before `today`.
pub fn retention_cutoff(today: NaiveDate, older_than_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(older_than_days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Async store contract used by the orchestrator, analytics, and dashboard.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Inserts or replaces records by id in one transaction.
    ///
    /// Every column takes the incoming value except `escalated`, which is
    /// OR-ed with the stored value. Returns the number of records written.
    async fn upsert(&self, records: &[IncidentRecord]) -> StoreResult<usize>;

    /// Records matching `query`, newest first.
    async fn query(&self, query: IncidentQuery) -> StoreResult<Vec<IncidentRecord>>;

    async fn query_range(
        &self,
        service_id: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<IncidentRecord>> {
        let mut query = IncidentQuery::range(start, end);
        query.service_id = service_id.map(str::to_string);
        self.query(query).await
    }

    async fn get(&self, incident_id: &str) -> StoreResult<Option<IncidentRecord>>;

    /// Deletes records created before `cutoff`; returns how many were removed.
    async fn delete_created_before(&self, cutoff: NaiveDate) -> StoreResult<usize>;

    /// Deletes records created more than `older_than_days` days before today.
    async fn cleanup(&self, older_than_days: u32) -> StoreResult<usize> {
        self.delete_created_before(retention_cutoff(today(), older_than_days))
            .await
    }

    async fn stats(&self) -> StoreResult<StoreStats>;
}

/// Orders records newest first, breaking ties by id.
pub(crate) fn sort_newest_first(records: &mut [IncidentRecord]) {
    records.sort_by(|left, right| {
        right
            .created_at
            .cmp(&left.created_at)
            .then_with(|| left.id.cmp(&right.id))
    });
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryIncidentStore {
    inner: RwLock<HashMap<String, IncidentRecord>>,
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn upsert(&self, records: &[IncidentRecord]) -> StoreResult<usize> {
        if let Some(record) = records.iter().find(|record| record.id.trim().is_empty()) {
            return Err(StoreError::InvalidRecord(format!(
                "incident '{}' has an empty id",
                record.title
            )));
        }

        let mut inner = self.inner.write().await;
        for record in records {
            let mut next = record.clone();
            if let Some(prior) = inner.get(&record.id) {
                next.absorb_prior(prior);
            }
            inner.insert(next.id.clone(), next);
        }
        Ok(records.len())
    }

    async fn query(&self, query: IncidentQuery) -> StoreResult<Vec<IncidentRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<IncidentRecord> = inner
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn get(&self, incident_id: &str) -> StoreResult<Option<IncidentRecord>> {
        Ok(self.inner.read().await.get(incident_id).cloned())
    }

    async fn delete_created_before(&self, cutoff: NaiveDate) -> StoreResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.len();
        inner.retain(|_, record| record.created_date() >= cutoff);
        Ok(before - inner.len())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let inner = self.inner.read().await;
        let service_ids: BTreeSet<String> = inner
            .values()
            .map(|record| record.service_id.clone())
            .collect();
        Ok(StoreStats {
            total: inner.len(),
            escalated: inner.values().filter(|record| record.escalated).count(),
            service_ids: service_ids.into_iter().collect(),
            earliest: inner.values().map(IncidentRecord::created_date).min(),
            latest: inner.values().map(IncidentRecord::created_date).max(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{date, record_days_ago, record_on};
    use super::{retention_cutoff, InMemoryIncidentStore, IncidentQuery, IncidentStore};
    use pulse_types::{today, IncidentStatus};

    #[tokio::test]
    async fn upsert_is_idempotent_and_final_write_wins() {
        let store = InMemoryIncidentStore::new();
        let mut record = record_on("Q1", "PHMCGNE", date("2025-08-23"));
        store.upsert(&[record.clone()]).await.expect("first upsert");
        store.upsert(&[record.clone()]).await.expect("repeat upsert");

        record.status = IncidentStatus::Resolved;
        record.title = "renamed".to_string();
        store.upsert(&[record]).await.expect("update");

        let stored = store.get("Q1").await.expect("get").expect("stored");
        assert_eq!(stored.status, IncidentStatus::Resolved);
        assert_eq!(stored.title, "renamed");
        assert_eq!(store.stats().await.expect("stats").total, 1);
    }

    #[tokio::test]
    async fn escalation_survives_later_unescalated_writes() {
        let store = InMemoryIncidentStore::new();
        let mut record = record_on("Q1", "PHMCGNE", date("2025-08-23"));
        record.escalated = true;
        store.upsert(&[record.clone()]).await.expect("escalated");

        record.escalated = false;
        store.upsert(&[record]).await.expect("unescalated");
        assert!(store.get("Q1").await.expect("get").expect("stored").escalated);
    }

    #[tokio::test]
    async fn empty_id_rejects_the_whole_batch() {
        let store = InMemoryIncidentStore::new();
        let good = record_on("Q1", "PHMCGNE", date("2025-08-23"));
        let bad = record_on("", "PHMCGNE", date("2025-08-23"));
        assert!(store.upsert(&[good, bad]).await.is_err());
        assert!(store.get("Q1").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn query_range_is_inclusive_and_newest_first() {
        let store = InMemoryIncidentStore::new();
        store
            .upsert(&[
                record_on("Q-before", "PHMCGNE", date("2025-08-19")),
                record_on("Q-start", "PHMCGNE", date("2025-08-20")),
                record_on("Q-end", "PHMCGNE", date("2025-08-22")),
                record_on("Q-other", "POTHER1", date("2025-08-21")),
                record_on("Q-after", "PHMCGNE", date("2025-08-23")),
            ])
            .await
            .expect("upsert");

        let records = store
            .query_range(Some("PHMCGNE"), date("2025-08-20"), date("2025-08-22"))
            .await
            .expect("query");
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["Q-end", "Q-start"]);

        let all = store
            .query(IncidentQuery::range(date("2025-08-20"), date("2025-08-22")))
            .await
            .expect("query all");
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn escalated_only_filters_records() {
        let store = InMemoryIncidentStore::new();
        let mut escalated = record_on("Q1", "PHMCGNE", date("2025-08-21"));
        escalated.escalated = true;
        store
            .upsert(&[escalated, record_on("Q2", "PHMCGNE", date("2025-08-21"))])
            .await
            .expect("upsert");

        let records = store
            .query(IncidentQuery::range(date("2025-08-21"), date("2025-08-21")).escalated_only())
            .await
            .expect("query");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "Q1");
    }

    #[tokio::test]
    async fn cleanup_removes_records_older_than_retention() {
        let store = InMemoryIncidentStore::new();
        let now = today();
        store
            .upsert(&[
                record_days_ago("Q10", now, 10),
                record_days_ago("Q65", now, 65),
                record_days_ago("Q90", now, 90),
            ])
            .await
            .expect("upsert");

        assert_eq!(store.cleanup(60).await.expect("cleanup"), 2);
        assert!(store.get("Q10").await.expect("get").is_some());
        assert_eq!(store.stats().await.expect("stats").total, 1);
    }

    #[test]
    fn retention_cutoff_subtracts_days() {
        assert_eq!(retention_cutoff(date("2025-08-23"), 60), date("2025-06-24"));
        assert_eq!(retention_cutoff(date("2025-08-23"), 0), date("2025-08-23"));
    }

    #[tokio::test]
    async fn stats_report_services_and_date_span() {
        let store = InMemoryIncidentStore::new();
        store
            .upsert(&[
                record_on("Q1", "PHMCGNE", date("2025-08-20")),
                record_on("Q2", "POTHER1", date("2025-08-22")),
            ])
            .await
            .expect("upsert");
        let stats = store.stats().await.expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.service_ids, vec!["PHMCGNE", "POTHER1"]);
        assert_eq!(stats.earliest, Some(date("2025-08-20")));
        assert_eq!(stats.latest, Some(date("2025-08-22")));
    }
}
