use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use httpmock::prelude::*;
use pulse_orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, RunRequest, RunSummary, ServiceSelector,
    ServiceStatus,
};
use pulse_source::{PagerDutyClient, PagerDutyConfig, RetryPolicy, ServiceDirectory, SourceError};
use pulse_store::{IncidentStore, SqliteIncidentStore};
use pulse_types::{IncidentStatus, IngestWindow};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio::sync::watch;

const DB_SERVICE: &str = "PHMCGNE";
const WEB_SERVICE: &str = "PWEB001";

struct Harness {
    _temp: TempDir,
    store: Arc<SqliteIncidentStore>,
    orchestrator: Orchestrator,
}

fn services() -> ServiceDirectory {
    [
        (DB_SERVICE, "Production Database Service"),
        (WEB_SERVICE, "Web Frontend"),
    ]
    .into_iter()
    .collect()
}

fn harness(server: &MockServer, request_timeout_ms: u64, batch_size: usize) -> Harness {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(
        SqliteIncidentStore::new(temp.path().join("incidents.sqlite")).expect("open store"),
    );
    let mut config = PagerDutyConfig::new("pd-test-token", services());
    config.api_base = server.base_url();
    config.request_timeout_ms = request_timeout_ms;
    config.retry = RetryPolicy {
        max_attempts: 2,
        base_backoff_ms: 1,
        jitter: false,
    };
    let client = PagerDutyClient::new(config).expect("client");
    let orchestrator = Orchestrator::new(
        Arc::new(client),
        store.clone(),
        services(),
        OrchestratorConfig {
            batch_size,
            batch_pause: Duration::ZERO,
        },
    );
    Harness {
        _temp: temp,
        store,
        orchestrator,
    }
}

fn incident(id: &str, service_id: &str, created_at: &str) -> Value {
    json!({
        "id": id,
        "title": format!("incident {id}"),
        "status": "acknowledged",
        "urgency": "high",
        "created_at": created_at,
        "service": {"id": service_id, "summary": "from api"}
    })
}

fn window() -> IngestWindow {
    IngestWindow::new(
        "2025-08-20".parse().expect("date"),
        "2025-08-23".parse().expect("date"),
    )
    .expect("window")
}

async fn run(harness: &Harness, selector: ServiceSelector, window: IngestWindow) -> RunSummary {
    run_with_retention(harness, selector, window, None).await
}

async fn run_with_retention(
    harness: &Harness,
    selector: ServiceSelector,
    window: IngestWindow,
    retention_days: Option<u32>,
) -> RunSummary {
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    harness
        .orchestrator
        .run(
            RunRequest {
                selector,
                window,
                retention_days,
            },
            cancel_rx,
        )
        .await
        .expect("run should not abort")
}

fn mock_empty_custom_fields(server: &MockServer, id: &str) {
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("/incidents/{id}/custom_fields/values"));
        then.status(200).json_body(json!({"custom_fields": []}));
    });
}

fn mock_log_entries<'a>(
    server: &'a MockServer,
    id: &str,
    entry_type: &str,
) -> httpmock::Mock<'a> {
    let entry_type = entry_type.to_string();
    server.mock(move |when, then| {
        when.method(GET).path(format!("/incidents/{id}/log_entries"));
        then.status(200).json_body(json!({
            "log_entries": [{"type": entry_type}],
            "more": false
        }));
    })
}

#[tokio::test]
async fn escalation_seen_once_survives_later_fetches() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(200).json_body(json!({
            "incidents": [incident("Q1", DB_SERVICE, "2025-08-23T17:00:00Z")],
            "more": false
        }));
    });
    mock_empty_custom_fields(&server, "Q1");
    let harness = harness(&server, 2_000, 20);
    let selector = ServiceSelector::One(DB_SERVICE.to_string());

    let mut log_entries = mock_log_entries(&server, "Q1", "acknowledge_log_entry");
    let first = run(&harness, selector.clone(), window()).await;
    assert_eq!(first.total_persisted(), 1);
    let stored = harness.store.get("Q1").await.expect("get").expect("stored");
    assert!(!stored.escalated);
    log_entries.delete();

    let mut log_entries = mock_log_entries(&server, "Q1", "escalate_log_entry");
    run(&harness, selector.clone(), window()).await;
    let stored = harness.store.get("Q1").await.expect("get").expect("stored");
    assert!(stored.escalated);
    log_entries.delete();

    mock_log_entries(&server, "Q1", "resolve_log_entry");
    let third = run(&harness, selector, window()).await;
    assert_eq!(third.outcomes[0].escalated, 0);
    let stored = harness.store.get("Q1").await.expect("get").expect("stored");
    assert!(stored.escalated, "escalation must never be cleared");
    assert_eq!(stored.status, IncidentStatus::Acknowledged);
    assert_eq!(stored.service_name, "Production Database Service");
}

#[tokio::test]
async fn custom_field_timeouts_degrade_instead_of_failing() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(200).json_body(json!({
            "incidents": [incident("Q7", DB_SERVICE, "2025-08-22T09:00:00-07:00")],
            "more": false
        }));
    });
    mock_log_entries(&server, "Q7", "escalate_log_entry");
    let custom_fields = server.mock(|when, then| {
        when.method(GET).path("/incidents/Q7/custom_fields/values");
        then.status(200)
            .delay(Duration::from_millis(500))
            .json_body(json!({"custom_fields": [{"name": "resolution", "value": "ccoe"}]}));
    });
    let harness = harness(&server, 100, 20);

    let summary = run(&harness, ServiceSelector::One(DB_SERVICE.to_string()), window()).await;
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, ServiceStatus::Completed);
    assert_eq!(outcome.persisted, 1);
    assert_eq!(outcome.degraded, 1);
    assert!(outcome.error.is_none());
    custom_fields.assert_calls(2);

    let stored = harness.store.get("Q7").await.expect("get").expect("stored");
    assert!(stored.escalated);
    assert!(!stored.resolved_by_resolution_team);
    assert_eq!(stored.root_cause, None);
}

#[tokio::test]
async fn large_listing_is_persisted_in_batches_of_twenty() {
    let server = MockServer::start_async().await;
    let incidents: Vec<Value> = (0..45)
        .map(|index| incident(&format!("Q{index:02}"), DB_SERVICE, "2025-08-21T12:00:00-07:00"))
        .collect();
    server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(200)
            .json_body(json!({"incidents": incidents, "more": false}));
    });
    for index in 0..45 {
        let id = format!("Q{index:02}");
        mock_log_entries(&server, &id, "trigger_log_entry");
        mock_empty_custom_fields(&server, &id);
    }
    let harness = harness(&server, 2_000, 20);

    let summary = run(&harness, ServiceSelector::One(DB_SERVICE.to_string()), window()).await;
    assert_eq!(summary.outcomes[0].batches, 3);
    assert_eq!(summary.outcomes[0].persisted, 45);

    let stored = harness
        .store
        .query_range(Some(DB_SERVICE), window().start, window().end)
        .await
        .expect("query range");
    assert_eq!(stored.len(), 45);
}

#[tokio::test]
async fn failing_service_does_not_stop_the_others() {
    let server = MockServer::start_async().await;
    let broken = server.mock(|when, then| {
        when.method(GET)
            .path("/incidents")
            .query_param("service_ids[]", WEB_SERVICE);
        then.status(500).body("upstream exploded");
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/incidents")
            .query_param("service_ids[]", DB_SERVICE);
        then.status(200).json_body(json!({
            "incidents": [incident("Q1", DB_SERVICE, "2025-08-23T08:00:00-07:00")],
            "more": false
        }));
    });
    mock_log_entries(&server, "Q1", "trigger_log_entry");
    mock_empty_custom_fields(&server, "Q1");
    let harness = harness(&server, 2_000, 20);

    let summary = run(&harness, ServiceSelector::All, window()).await;
    assert!(summary.has_failures());
    broken.assert_calls(2);

    let by_service = |service_id: &str| {
        summary
            .outcomes
            .iter()
            .find(|outcome| outcome.service_id == service_id)
            .expect("outcome")
    };
    assert_eq!(by_service(WEB_SERVICE).status, ServiceStatus::Failed);
    assert_eq!(by_service(DB_SERVICE).status, ServiceStatus::Completed);
    assert_eq!(by_service(DB_SERVICE).persisted, 1);
}

#[tokio::test]
async fn retention_after_ingest_removes_old_incidents() {
    let today = pulse_types::today();
    let created = |days: u64| -> String {
        let date: NaiveDate = today.checked_sub_days(Days::new(days)).expect("date");
        format!("{date}T12:00:00-07:00")
    };
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(200).json_body(json!({
            "incidents": [
                incident("Q10", DB_SERVICE, &created(10)),
                incident("Q65", DB_SERVICE, &created(65)),
                incident("Q90", DB_SERVICE, &created(90)),
            ],
            "more": false
        }));
    });
    for id in ["Q10", "Q65", "Q90"] {
        mock_log_entries(&server, id, "trigger_log_entry");
        mock_empty_custom_fields(&server, id);
    }
    let harness = harness(&server, 2_000, 20);

    let summary = run_with_retention(
        &harness,
        ServiceSelector::One(DB_SERVICE.to_string()),
        IngestWindow::last_days(100).expect("window"),
        Some(60),
    )
    .await;
    assert_eq!(summary.total_persisted(), 3);
    assert_eq!(summary.cleaned_up, Some(2));

    let stats = harness.store.stats().await.expect("stats");
    assert_eq!(stats.total, 1);
    assert!(harness.store.get("Q10").await.expect("get").is_some());
}

#[tokio::test]
async fn token_rejected_during_enrichment_aborts_without_persisting() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(200).json_body(json!({
            "incidents": [
                incident("Q1", DB_SERVICE, "2025-08-22T09:00:00-07:00"),
                incident("Q2", DB_SERVICE, "2025-08-22T10:00:00-07:00"),
            ],
            "more": false
        }));
    });
    for id in ["Q1", "Q2"] {
        server.mock(move |when, then| {
            when.method(GET).path(format!("/incidents/{id}/log_entries"));
            then.status(401)
                .json_body(json!({"error": {"message": "Unauthorized"}}));
        });
        server.mock(move |when, then| {
            when.method(GET)
                .path(format!("/incidents/{id}/custom_fields/values"));
            then.status(403);
        });
    }
    let harness = harness(&server, 2_000, 20);

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let error = harness
        .orchestrator
        .run(
            RunRequest {
                selector: ServiceSelector::All,
                window: window(),
                retention_days: None,
            },
            cancel_rx,
        )
        .await
        .expect_err("rejected credentials must abort the run");

    assert!(matches!(
        error,
        OrchestratorError::Unauthorized(SourceError::Unauthorized { .. })
    ));
    let stats = harness.store.stats().await.expect("stats");
    assert_eq!(stats.total, 0);
}
