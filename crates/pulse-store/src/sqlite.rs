//! SQLite-backed `IncidentStore` implementation with durable persistence.

use crate::{IncidentQuery, IncidentStore, StoreError, StoreResult, StoreStats};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use pulse_types::{parse_api_timestamp, timestamp_to_text, IncidentRecord, IncidentStatus, Urgency};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, title, service_id, service_name, status, urgency, priority, description,
        escalation_policy_id, escalation_policy_name, created_at, acknowledged_at,
        resolved_at, is_escalated, resolved_by_resolution_team, root_cause, updated_at
    FROM incidents
"#;

/// Persistent SQLite store for normalized incidents.
#[derive(Debug)]
pub struct SqliteIncidentStore {
    db_path: PathBuf,
}

impl SqliteIncidentStore {
    /// Opens (or creates) the database at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        // created_at is stored at a fixed -07:00 offset, so its first ten
        // characters are the incident calendar date and text order is time order.
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY CHECK (length(trim(id)) > 0),
                title TEXT NOT NULL,
                service_id TEXT NOT NULL,
                service_name TEXT NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('triggered', 'acknowledged', 'resolved')),
                urgency TEXT NOT NULL,
                priority TEXT NULL,
                description TEXT NULL,
                escalation_policy_id TEXT NULL,
                escalation_policy_name TEXT NULL,
                created_at TEXT NOT NULL,
                acknowledged_at TEXT NULL,
                resolved_at TEXT NULL,
                is_escalated INTEGER NOT NULL DEFAULT 0,
                resolved_by_resolution_team INTEGER NOT NULL DEFAULT 0,
                root_cause TEXT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_incidents_service_created
                ON incidents (service_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents (status);
            CREATE INDEX IF NOT EXISTS idx_incidents_escalated ON incidents (is_escalated);
            CREATE INDEX IF NOT EXISTS idx_incidents_created_date
                ON incidents (substr(created_at, 1, 10));
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl IncidentStore for SqliteIncidentStore {
    async fn upsert(&self, records: &[IncidentRecord]) -> StoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        {
            let mut statement = transaction.prepare(
                r#"
                INSERT INTO incidents (
                    id, title, service_id, service_name, status, urgency, priority,
                    description, escalation_policy_id, escalation_policy_name, created_at,
                    acknowledged_at, resolved_at, is_escalated, resolved_by_resolution_team,
                    root_cause, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    service_id = excluded.service_id,
                    service_name = excluded.service_name,
                    status = excluded.status,
                    urgency = excluded.urgency,
                    priority = excluded.priority,
                    description = excluded.description,
                    escalation_policy_id = excluded.escalation_policy_id,
                    escalation_policy_name = excluded.escalation_policy_name,
                    created_at = excluded.created_at,
                    acknowledged_at = excluded.acknowledged_at,
                    resolved_at = excluded.resolved_at,
                    is_escalated = MAX(incidents.is_escalated, excluded.is_escalated),
                    resolved_by_resolution_team = excluded.resolved_by_resolution_team,
                    root_cause = excluded.root_cause,
                    updated_at = excluded.updated_at
                "#,
            )?;
            for record in records {
                statement.execute(params![
                    record.id,
                    record.title,
                    record.service_id,
                    record.service_name,
                    record.status.as_str(),
                    record.urgency.as_str(),
                    record.priority,
                    record.description,
                    record.escalation_policy_id,
                    record.escalation_policy_name,
                    timestamp_to_text(record.created_at),
                    option_timestamp_to_db(record.acknowledged_at),
                    option_timestamp_to_db(record.resolved_at),
                    bool_to_db(record.escalated),
                    bool_to_db(record.resolved_by_resolution_team),
                    record.root_cause,
                    timestamp_to_text(record.updated_at),
                ])?;
            }
        }
        transaction.commit()?;

        debug!(count = records.len(), "upserted incident batch");
        Ok(records.len())
    }

    async fn query(&self, query: IncidentQuery) -> StoreResult<Vec<IncidentRecord>> {
        let connection = self.open_connection()?;
        let sql = format!(
            r#"{SELECT_COLUMNS}
            WHERE substr(created_at, 1, 10) BETWEEN ?1 AND ?2
              AND (?3 IS NULL OR service_id = ?3)
              AND (?4 = 0 OR is_escalated = 1)
            ORDER BY created_at DESC, id ASC
            "#
        );
        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement.query(params![
            date_to_db(query.start),
            date_to_db(query.end),
            query.service_id,
            bool_to_db(query.escalated_only),
        ])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(record_from_row(row)?);
        }
        Ok(records)
    }

    async fn get(&self, incident_id: &str) -> StoreResult<Option<IncidentRecord>> {
        let connection = self.open_connection()?;
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row = connection
            .query_row(&sql, params![incident_id], |row| Ok(record_from_row(row)))
            .optional()?;
        row.transpose()
    }

    async fn delete_created_before(&self, cutoff: NaiveDate) -> StoreResult<usize> {
        let connection = self.open_connection()?;
        let deleted = connection.execute(
            "DELETE FROM incidents WHERE substr(created_at, 1, 10) < ?1",
            params![date_to_db(cutoff)],
        )?;
        debug!(%cutoff, deleted, "deleted incidents before cutoff");
        Ok(deleted)
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let connection = self.open_connection()?;
        let (total, escalated, earliest, latest): (i64, i64, Option<String>, Option<String>) =
            connection.query_row(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(is_escalated), 0),
                    MIN(substr(created_at, 1, 10)),
                    MAX(substr(created_at, 1, 10))
                FROM incidents
                "#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let mut statement =
            connection.prepare("SELECT DISTINCT service_id FROM incidents ORDER BY service_id")?;
        let service_ids = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoreStats {
            total: i64_to_usize("total", total)?,
            escalated: i64_to_usize("escalated", escalated)?,
            service_ids,
            earliest: option_date_from_db("earliest", earliest)?,
            latest: option_date_from_db("latest", latest)?,
        })
    }
}

fn record_from_row(row: &Row<'_>) -> StoreResult<IncidentRecord> {
    Ok(IncidentRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        service_id: row.get(2)?,
        service_name: row.get(3)?,
        status: status_from_db(&row.get::<_, String>(4)?)?,
        urgency: urgency_from_db(&row.get::<_, String>(5)?)?,
        priority: row.get(6)?,
        description: row.get(7)?,
        escalation_policy_id: row.get(8)?,
        escalation_policy_name: row.get(9)?,
        created_at: timestamp_from_db(&row.get::<_, String>(10)?)?,
        acknowledged_at: option_timestamp_from_db(row.get(11)?)?,
        resolved_at: option_timestamp_from_db(row.get(12)?)?,
        escalated: row.get::<_, i64>(13)? != 0,
        resolved_by_resolution_team: row.get::<_, i64>(14)? != 0,
        root_cause: row.get(15)?,
        updated_at: timestamp_from_db(&row.get::<_, String>(16)?)?,
    })
}

fn bool_to_db(value: bool) -> i64 {
    i64::from(value)
}

fn date_to_db(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn option_date_from_db(field: &'static str, value: Option<String>) -> StoreResult<Option<NaiveDate>> {
    value
        .map(|item| {
            item.parse::<NaiveDate>()
                .map_err(|_| StoreError::InvalidPersistedValue { field, value: item })
        })
        .transpose()
}

fn option_timestamp_to_db(value: Option<DateTime<FixedOffset>>) -> Option<String> {
    value.map(timestamp_to_text)
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<FixedOffset>> {
    Ok(parse_api_timestamp(value)?)
}

fn option_timestamp_from_db(value: Option<String>) -> StoreResult<Option<DateTime<FixedOffset>>> {
    value.as_deref().map(timestamp_from_db).transpose()
}

fn status_from_db(value: &str) -> StoreResult<IncidentStatus> {
    IncidentStatus::parse(value).ok_or_else(|| StoreError::InvalidPersistedValue {
        field: "status",
        value: value.to_string(),
    })
}

fn urgency_from_db(value: &str) -> StoreResult<Urgency> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidPersistedValue {
            field: "urgency",
            value: value.to_string(),
        })
}

fn i64_to_usize(field: &'static str, value: i64) -> StoreResult<usize> {
    usize::try_from(value).map_err(|_| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}
