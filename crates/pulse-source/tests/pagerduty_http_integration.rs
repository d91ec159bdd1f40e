use httpmock::prelude::*;
use pulse_source::{
    EnrichmentGap, IncidentSource, PagerDutyAuthScheme, PagerDutyClient, PagerDutyConfig,
    RetryPolicy, ServiceDirectory, SourceError,
};
use pulse_types::{IncidentStatus, IngestWindow};
use serde_json::json;
use std::time::Duration;

const SERVICE_ID: &str = "PHMCGNE";

fn config_for(server: &MockServer) -> PagerDutyConfig {
    let services: ServiceDirectory = [(SERVICE_ID, "Production Database Service")]
        .into_iter()
        .collect();
    let mut config = PagerDutyConfig::new("test-pd-token", services);
    config.api_base = server.base_url();
    config.request_timeout_ms = 2_000;
    config.retry = RetryPolicy {
        max_attempts: 2,
        base_backoff_ms: 1,
        jitter: false,
    };
    config
}

fn client_for(server: &MockServer) -> PagerDutyClient {
    PagerDutyClient::new(config_for(server)).expect("client should be created")
}

fn window() -> IngestWindow {
    IngestWindow::new(
        "2025-08-20".parse().expect("date"),
        "2025-08-23".parse().expect("date"),
    )
    .expect("window")
}

fn incident(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": format!("incident {id}"),
        "status": status,
        "urgency": "high",
        "created_at": "2025-08-23T17:00:00Z",
        "service": {"id": SERVICE_ID, "summary": "db-prod"},
        "escalation_policy": {"id": "PPOLICY", "summary": "DB on-call"}
    })
}

#[tokio::test]
async fn list_incidents_sends_expected_request_and_follows_pages() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(GET)
            .path("/incidents")
            .header("authorization", "Token token=test-pd-token")
            .header("accept", "application/vnd.pagerduty+json;version=2")
            .header_exists("x-pulse-request-id")
            .query_param("offset", "0")
            .query_param("limit", "100")
            .query_param("sort_by", "created_at:desc")
            .query_param("since", "2025-08-20T00:00:00-07:00")
            .query_param("until", "2025-08-24T00:00:00-07:00");
        then.status(200).json_body(json!({
            "incidents": [incident("Q1", "resolved"), incident("Q2", "triggered")],
            "more": true
        }));
    });
    let second = server.mock(|when, then| {
        when.method(GET).path("/incidents").query_param("offset", "2");
        then.status(200).json_body(json!({
            "incidents": [incident("Q2", "triggered"), incident("Q3", "acknowledged")],
            "more": false
        }));
    });

    let listing = client_for(&server)
        .list_incidents(SERVICE_ID, &window())
        .await
        .expect("listing should succeed");

    first.assert_calls(1);
    second.assert_calls(1);
    let ids: Vec<&str> = listing.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["Q1", "Q2", "Q3"]);
    assert_eq!(listing.records[0].service_name, "Production Database Service");
    assert_eq!(listing.records[2].status, IncidentStatus::Acknowledged);
    assert!(listing.rejected.is_empty());
}

#[tokio::test]
async fn list_incidents_rejects_unknown_status_without_failing() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(200).json_body(json!({
            "incidents": [incident("Q1", "resolved"), incident("Q9", "snoozed")],
            "more": false
        }));
    });

    let listing = client_for(&server)
        .list_incidents(SERVICE_ID, &window())
        .await
        .expect("listing should succeed");

    assert_eq!(listing.records.len(), 1);
    assert_eq!(listing.rejected.len(), 1);
    assert_eq!(listing.rejected[0].id, "Q9");
}

#[tokio::test]
async fn bearer_scheme_sends_bearer_authorization() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/incidents")
            .header("authorization", "Bearer oauth-token");
        then.status(200)
            .json_body(json!({"incidents": [], "more": false}));
    });

    let mut config = config_for(&server);
    config.api_token = "oauth-token".to_string();
    config.auth_scheme = PagerDutyAuthScheme::Bearer;
    let listing = PagerDutyClient::new(config)
        .expect("client")
        .list_incidents(SERVICE_ID, &window())
        .await
        .expect("listing");

    mock.assert();
    assert!(listing.records.is_empty());
}

#[tokio::test]
async fn unauthorized_is_fatal_and_not_retried() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(401)
            .json_body(json!({"error": {"message": "Unauthorized"}}));
    });

    let error = client_for(&server)
        .list_incidents(SERVICE_ID, &window())
        .await
        .expect_err("401 should fail");

    mock.assert_calls(1);
    assert!(matches!(error, SourceError::Unauthorized { status: 401 }));
    assert!(error.is_fatal());
}

#[tokio::test]
async fn server_error_is_retried_then_succeeds() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(GET)
            .path("/incidents")
            .header("x-pulse-retry-attempt", "0");
        then.status(503).body("temporarily unavailable");
    });
    let second = server.mock(|when, then| {
        when.method(GET)
            .path("/incidents")
            .header("x-pulse-retry-attempt", "1");
        then.status(200).json_body(json!({
            "incidents": [incident("Q1", "resolved")],
            "more": false
        }));
    });

    let listing = client_for(&server)
        .list_incidents(SERVICE_ID, &window())
        .await
        .expect("second attempt should succeed");

    first.assert_calls(1);
    second.assert_calls(1);
    assert_eq!(listing.records.len(), 1);
}

#[tokio::test]
async fn server_error_surfaces_after_attempts_are_exhausted() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(502).body("bad gateway");
    });

    let error = client_for(&server)
        .list_incidents(SERVICE_ID, &window())
        .await
        .expect_err("listing should fail");

    mock.assert_calls(2);
    assert!(matches!(error, SourceError::HttpStatus { status: 502, .. }));
    assert!(!error.is_fatal());
}

#[tokio::test]
async fn enrich_batch_applies_log_entries_and_custom_fields() {
    let server = MockServer::start();
    let escalated_log = server.mock(|when, then| {
        when.method(GET)
            .path("/incidents/Q1/log_entries")
            .query_param("is_overview", "false");
        then.status(200).json_body(json!({
            "log_entries": [
                {"type": "trigger_log_entry"},
                {"type": "escalate_log_entry"}
            ],
            "more": false
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1/custom_fields/values");
        then.status(200).json_body(json!({
            "custom_fields": [
                {"name": "resolution", "value": "CCOE"},
                {"field": {"name": "prelim_root_cause"}, "value": "Rheos"}
            ]
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q2/log_entries");
        then.status(200).json_body(json!({"log_entries": null}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q2/custom_fields/values");
        then.status(200).json_body(json!({
            "custom_fields": [{"name": "prelim_root_cause", "value": "cosmic rays"}]
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(200).json_body(json!({
            "incidents": [incident("Q1", "resolved"), incident("Q2", "resolved")],
            "more": false
        }));
    });

    let enriched = client_for(&server)
        .fetch_window(SERVICE_ID, &window())
        .await
        .expect("window should be fetched");

    escalated_log.assert_calls(1);
    assert_eq!(enriched.len(), 2);
    let first = &enriched[0];
    assert!(!first.is_degraded());
    assert!(first.record.escalated);
    assert!(first.record.resolved_by_resolution_team);
    assert_eq!(first.record.root_cause.as_deref(), Some("rheos"));

    let second = &enriched[1];
    assert!(!second.is_degraded());
    assert!(!second.record.escalated);
    assert!(!second.record.resolved_by_resolution_team);
    assert_eq!(second.record.root_cause, None);
}

#[tokio::test]
async fn log_entries_follow_pages_until_escalation_found() {
    let server = MockServer::start();
    let first_page = server.mock(|when, then| {
        when.method(GET)
            .path("/incidents/Q1/log_entries")
            .query_param("offset", "0");
        then.status(200).json_body(json!({
            "log_entries": [{"type": "trigger_log_entry"}],
            "more": true
        }));
    });
    let second_page = server.mock(|when, then| {
        when.method(GET)
            .path("/incidents/Q1/log_entries")
            .query_param("offset", "1");
        then.status(200).json_body(json!({
            "log_entries": [{"type": "escalate_log_entry"}],
            "more": true
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1/custom_fields/values");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1");
        then.status(200)
            .json_body(json!({"incident": incident("Q1", "acknowledged")}));
    });

    let enriched = client_for(&server)
        .fetch_incident("Q1")
        .await
        .expect("incident should be fetched");

    first_page.assert_calls(1);
    second_page.assert_calls(1);
    assert!(enriched.record.escalated);
    assert!(!enriched.is_degraded());
    assert_eq!(enriched.record.status, IncidentStatus::Acknowledged);
}

#[tokio::test]
async fn custom_field_timeouts_degrade_to_defaults_without_failing_the_batch() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(200).json_body(json!({
            "incidents": [incident("Q1", "resolved")],
            "more": false
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1/log_entries");
        then.status(200).json_body(json!({
            "log_entries": [{"type": "escalate_log_entry"}],
            "more": false
        }));
    });
    let slow_fields = server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1/custom_fields/values");
        then.status(200)
            .delay(Duration::from_millis(500))
            .json_body(json!({"custom_fields": [{"name": "resolution", "value": "ccoe"}]}));
    });

    let mut config = config_for(&server);
    config.request_timeout_ms = 100;
    let enriched = PagerDutyClient::new(config)
        .expect("client")
        .fetch_window(SERVICE_ID, &window())
        .await
        .expect("timeouts must not fail the window");

    slow_fields.assert_calls(2);
    assert_eq!(enriched.len(), 1);
    let item = &enriched[0];
    assert_eq!(item.gaps, vec![EnrichmentGap::CustomFields]);
    assert!(item.record.escalated);
    assert!(!item.record.resolved_by_resolution_team);
    assert_eq!(item.record.root_cause, None);
}

#[tokio::test]
async fn log_entry_failures_leave_escalated_false() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1/log_entries");
        then.status(500).body("boom");
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1/custom_fields/values");
        then.status(200).body("");
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1");
        then.status(200)
            .json_body(json!({"incident": incident("Q1", "triggered")}));
    });

    let enriched = client_for(&server)
        .fetch_incident("Q1")
        .await
        .expect("incident should be fetched");

    assert_eq!(enriched.gaps, vec![EnrichmentGap::LogEntries]);
    assert!(!enriched.record.escalated);
}

#[tokio::test]
async fn fetch_incident_reports_missing_incident() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/incidents/QMISSING");
        then.status(404);
    });

    let error = client_for(&server)
        .fetch_incident("QMISSING")
        .await
        .expect_err("missing incident");
    assert!(matches!(error, SourceError::HttpStatus { status: 404, .. }));
}

#[tokio::test]
async fn rejected_credentials_during_enrichment_fail_the_batch() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/incidents");
        then.status(200).json_body(json!({
            "incidents": [incident("Q1", "resolved")],
            "more": false
        }));
    });
    let log_entries = server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1/log_entries");
        then.status(401)
            .json_body(json!({"error": {"message": "Unauthorized"}}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1/custom_fields/values");
        then.status(200).json_body(json!({"custom_fields": []}));
    });

    let error = client_for(&server)
        .fetch_window(SERVICE_ID, &window())
        .await
        .expect_err("a 401 during enrichment is not a partial enrichment");

    log_entries.assert_calls(1);
    assert!(matches!(error, SourceError::Unauthorized { status: 401 }));
    assert!(error.is_fatal());
}

#[tokio::test]
async fn forbidden_custom_fields_fail_a_single_incident_fetch() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1");
        then.status(200)
            .json_body(json!({"incident": incident("Q1", "triggered")}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1/log_entries");
        then.status(200)
            .json_body(json!({"log_entries": [], "more": false}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/incidents/Q1/custom_fields/values");
        then.status(403);
    });

    let error = client_for(&server)
        .fetch_incident("Q1")
        .await
        .expect_err("a 403 on custom fields is fatal");
    assert!(matches!(error, SourceError::Unauthorized { status: 403 }));
}
