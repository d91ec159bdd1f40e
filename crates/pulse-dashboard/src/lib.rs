//! Read-only JSON API over stored incidents and their metrics.

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Datelike, NaiveDate};
use pulse_analytics::{IncidentAnalytics, SummaryMetrics};
use pulse_source::ServiceDirectory;
use pulse_store::{IncidentQuery, IncidentStore, StoreError};
use pulse_types::IngestWindow;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

const DASHBOARD_SCHEMA_VERSION: u32 = 1;
const HEALTH_ENDPOINT: &str = "/health";
const SUMMARY_ENDPOINT: &str = "/api/summary";
const INCIDENTS_ENDPOINT: &str = "/api/incidents";
const INCIDENT_ENDPOINT: &str = "/api/incidents/{id}";
const SERVICES_ENDPOINT: &str = "/api/services";
const SERVICE_SUMMARY_ENDPOINT: &str = "/api/service/{id}/summary";
const SERVICE_TRENDS_ENDPOINT: &str = "/api/service/{id}/trends";
const SERVICE_CALENDAR_ENDPOINT: &str = "/api/service/{id}/calendar";
const STATS_ENDPOINT: &str = "/api/stats";
pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const MAX_WINDOW_DAYS: u32 = 365;

/// Shared handler state: store, service directory and the clock that anchors windows.
#[derive(Clone)]
pub struct DashboardState {
    store: Arc<dyn IncidentStore>,
    analytics: IncidentAnalytics,
    services: ServiceDirectory,
    today: fn() -> NaiveDate,
}

impl DashboardState {
    pub fn new(store: Arc<dyn IncidentStore>, services: ServiceDirectory) -> Self {
        Self::with_clock(store, services, pulse_types::today)
    }

    pub fn with_clock(
        store: Arc<dyn IncidentStore>,
        services: ServiceDirectory,
        today: fn() -> NaiveDate,
    ) -> Self {
        Self {
            analytics: IncidentAnalytics::new(store.clone()),
            store,
            services,
            today,
        }
    }

    /// Display name for a configured or stored service.
    async fn service_name(&self, service_id: &str) -> Result<String, ApiError> {
        if let Some(name) = self.services.name_for(service_id) {
            return Ok(name.to_string());
        }
        let stats = self.store.stats().await?;
        if stats.service_ids.iter().any(|id| id == service_id) {
            return Ok(service_id.to_string());
        }
        Err(ApiError::not_found(
            "service_not_found",
            format!("service '{service_id}' is neither configured nor stored"),
        ))
    }

    fn month(&self, params: &CalendarParams) -> Result<IngestWindow, ApiError> {
        let today = (self.today)();
        let year = parse_number(params.year.as_deref(), "year")?.unwrap_or(today.year());
        let month = parse_number(params.month.as_deref(), "month")?.unwrap_or(today.month());
        IngestWindow::month(year, month)
            .map_err(|error| ApiError::bad_request("invalid_month", error.to_string()))
    }

    fn window(&self, days: Option<&str>) -> Result<IngestWindow, ApiError> {
        let days = parse_days(days)?;
        IngestWindow::ending_on((self.today)(), days)
            .map_err(|error| ApiError::bad_request("invalid_window", error.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct SummaryParams {
    days: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IncidentsParams {
    days: Option<String>,
    service: Option<String>,
    escalated: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarParams {
    year: Option<String>,
    month: Option<String>,
}

#[derive(Debug, Serialize)]
struct ServiceView<'a> {
    id: &'a str,
    name: &'a str,
    /// False for services only known from stored incidents.
    configured: bool,
}

#[derive(Debug, Serialize)]
struct ServiceSummaryView {
    service_id: String,
    service_name: String,
    #[serde(flatten)]
    summary: SummaryMetrics,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        tracing::error!(error = %error, "dashboard store read failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "store_read_failed",
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": {
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

fn parse_days(raw: Option<&str>) -> Result<u32, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(DEFAULT_WINDOW_DAYS);
    };
    let days = raw.parse::<u32>().map_err(|_| {
        ApiError::bad_request("invalid_days", format!("days must be an integer, got '{raw}'"))
    })?;
    if days == 0 || days > MAX_WINDOW_DAYS {
        return Err(ApiError::bad_request(
            "invalid_days",
            format!("days must be between 1 and {MAX_WINDOW_DAYS}"),
        ));
    }
    Ok(days)
}

fn parse_number<T: std::str::FromStr>(
    raw: Option<&str>,
    field: &'static str,
) -> Result<Option<T>, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<T>().map(Some).map_err(|_| {
        ApiError::bad_request("invalid_month", format!("{field} must be an integer, got '{raw}'"))
    })
}

fn parse_flag(raw: Option<&str>) -> Result<bool, ApiError> {
    match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(other) => Err(ApiError::bad_request(
            "invalid_escalated",
            format!("escalated must be true or false, got '{other}'"),
        )),
    }
}

/// Builds the dashboard router.
pub fn build_dashboard_router(state: DashboardState) -> Router {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(SUMMARY_ENDPOINT, get(handle_summary))
        .route(INCIDENTS_ENDPOINT, get(handle_incidents))
        .route(INCIDENT_ENDPOINT, get(handle_incident))
        .route(SERVICES_ENDPOINT, get(handle_services))
        .route(SERVICE_SUMMARY_ENDPOINT, get(handle_service_summary))
        .route(SERVICE_TRENDS_ENDPOINT, get(handle_service_trends))
        .route(SERVICE_CALENDAR_ENDPOINT, get(handle_service_calendar))
        .route(STATS_ENDPOINT, get(handle_stats))
        .with_state(Arc::new(state))
}

/// Serves the dashboard API until ctrl-c.
pub async fn run_dashboard(
    bind: SocketAddr,
    store: Arc<dyn IncidentStore>,
    services: ServiceDirectory,
) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind dashboard on {bind}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve dashboard listen address")?;
    tracing::info!(addr = %local_addr, services = services.len(), "dashboard listening");
    println!("dashboard listening: addr={local_addr}");

    let app = build_dashboard_router(DashboardState::new(store, services));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("dashboard server exited unexpectedly")?;
    Ok(())
}

async fn handle_health(State(state): State<Arc<DashboardState>>) -> Response {
    match state.store.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(json!({
                "schema_version": DASHBOARD_SCHEMA_VERSION,
                "status": "ready",
                "incidents": stats.total,
            })),
        )
            .into_response(),
        Err(error) => ApiError::from(error).into_response(),
    }
}

async fn handle_summary(
    State(state): State<Arc<DashboardState>>,
    Query(params): Query<SummaryParams>,
) -> Result<Response, ApiError> {
    let window = state.window(params.days.as_deref())?;
    let summary = state.analytics.summary(&window).await?;
    Ok((StatusCode::OK, Json(summary)).into_response())
}

async fn handle_incidents(
    State(state): State<Arc<DashboardState>>,
    Query(params): Query<IncidentsParams>,
) -> Result<Response, ApiError> {
    let window = state.window(params.days.as_deref())?;
    let mut query = IncidentQuery::window(&window);
    if let Some(service_id) = params
        .service
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        query = query.for_service(service_id);
    }
    if parse_flag(params.escalated.as_deref())? {
        query = query.escalated_only();
    }
    let incidents = state.store.query(query).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "start": window.start,
            "end": window.end,
            "count": incidents.len(),
            "incidents": incidents,
        })),
    )
        .into_response())
}

async fn handle_incident(
    State(state): State<Arc<DashboardState>>,
    Path(incident_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.get(&incident_id).await? {
        Some(record) => Ok((StatusCode::OK, Json(record)).into_response()),
        None => Err(ApiError::not_found(
            "incident_not_found",
            format!("incident '{incident_id}' is not stored"),
        )),
    }
}

/// Configured services first, then any service that only appears in stored incidents.
async fn handle_services(State(state): State<Arc<DashboardState>>) -> Result<Response, ApiError> {
    let stats = state.store.stats().await?;
    let mut services: Vec<ServiceView<'_>> = state
        .services
        .iter()
        .map(|(id, name)| ServiceView {
            id,
            name,
            configured: true,
        })
        .collect();
    services.extend(
        stats
            .service_ids
            .iter()
            .filter(|id| !state.services.contains(id))
            .map(|id| ServiceView {
                id,
                name: id,
                configured: false,
            }),
    );
    Ok((StatusCode::OK, Json(json!({ "services": services }))).into_response())
}

async fn handle_service_summary(
    State(state): State<Arc<DashboardState>>,
    Path(service_id): Path<String>,
    Query(params): Query<SummaryParams>,
) -> Result<Response, ApiError> {
    let window = state.window(params.days.as_deref())?;
    let service_name = state.service_name(&service_id).await?;
    let summary = state.analytics.service_summary(&window, &service_id).await?;
    Ok((
        StatusCode::OK,
        Json(ServiceSummaryView {
            service_id,
            service_name,
            summary,
        }),
    )
        .into_response())
}

async fn handle_service_trends(
    State(state): State<Arc<DashboardState>>,
    Path(service_id): Path<String>,
    Query(params): Query<SummaryParams>,
) -> Result<Response, ApiError> {
    let window = state.window(params.days.as_deref())?;
    let service_name = state.service_name(&service_id).await?;
    let summary = state.analytics.service_summary(&window, &service_id).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "service_id": service_id,
            "service_name": service_name,
            "start": window.start,
            "end": window.end,
            "daily": summary.daily,
        })),
    )
        .into_response())
}

async fn handle_service_calendar(
    State(state): State<Arc<DashboardState>>,
    Path(service_id): Path<String>,
    Query(params): Query<CalendarParams>,
) -> Result<Response, ApiError> {
    let month = state.month(&params)?;
    let service_name = state.service_name(&service_id).await?;
    let days = state.analytics.service_calendar(&month, &service_id).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "service_id": service_id,
            "service_name": service_name,
            "year": month.start.year(),
            "month": month.start.month(),
            "days": days,
        })),
    )
        .into_response())
}

async fn handle_stats(State(state): State<Arc<DashboardState>>) -> Result<Response, ApiError> {
    let stats = state.store.stats().await?;
    let recent = state.window(None)?;
    let summary = state.analytics.summary(&recent).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "total": stats.total,
            "escalated": stats.escalated,
            "service_count": stats.service_ids.len(),
            "earliest": stats.earliest,
            "latest": stats.latest,
            "recent": {
                "days": summary.days,
                "total": summary.total,
                "escalated": summary.escalated,
            },
        })),
    )
        .into_response())
}
