use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use pulse_analytics::IncidentAnalytics;
use pulse_cli::{Cli, CliMode};
use pulse_orchestrator::{Orchestrator, OrchestratorError, RunRequest, ServiceSelector};
use pulse_source::PagerDutyClient;
use pulse_store::{IncidentStore, SqliteIncidentStore};
use pulse_types::IngestWindow;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bootstrap_helpers::{load_config, resolve_database_path, resolve_service_directory};
use crate::report;

const TOP_ESCALATED_LIMIT: usize = 5;
const EXIT_RUN_FAILED: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

fn open_store(path: &Path) -> Result<Arc<SqliteIncidentStore>> {
    let store = SqliteIncidentStore::new(path)
        .with_context(|| format!("failed to open incident database '{}'", path.display()))?;
    Ok(Arc::new(store))
}

struct IngestRuntime {
    orchestrator: Orchestrator,
    database: PathBuf,
}

fn build_ingest_runtime(cli: &Cli) -> Result<IngestRuntime> {
    let config = load_config(&cli.config)?;
    let database = cli
        .database
        .clone()
        .unwrap_or_else(|| config.database_path());
    let pagerduty = config
        .pagerduty_config(cli.api_token.as_deref())
        .with_context(|| format!("invalid PagerDuty settings in '{}'", cli.config.display()))?;
    let services = pagerduty.services.clone();
    let client = PagerDutyClient::new(pagerduty).context("failed to build PagerDuty client")?;
    let store = open_store(&database)?;
    let orchestrator = Orchestrator::new(
        Arc::new(client),
        store,
        services,
        config.orchestrator_config(),
    );
    Ok(IngestRuntime {
        orchestrator,
        database,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    /// Stop after the batch in flight.
    Drain,
    /// Exit immediately without waiting for in-flight requests.
    Abort,
}

fn interrupt_action(interrupts: usize) -> InterruptAction {
    if interrupts <= 1 {
        InterruptAction::Drain
    } else {
        InterruptAction::Abort
    }
}

/// Flips the returned receiver to `true` on the first ctrl-c and exits the
/// process with status 130 on the second.
fn spawn_ctrl_c_watch() -> (watch::Receiver<bool>, tokio::task::JoinHandle<()>) {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut interrupts = 0_usize;
        while tokio::signal::ctrl_c().await.is_ok() {
            interrupts += 1;
            match interrupt_action(interrupts) {
                InterruptAction::Drain => {
                    warn!(
                        "interrupt received; finishing the current batch before stopping \
                         (press ctrl-c again to abort)"
                    );
                    let _ = cancel_tx.send(true);
                }
                InterruptAction::Abort => {
                    error!("second interrupt received; aborting immediately");
                    std::process::exit(i32::from(EXIT_CANCELLED));
                }
            }
        }
    });
    (cancel_rx, handle)
}

fn ingest_window(days: u32, end: Option<NaiveDate>) -> Result<IngestWindow> {
    let window = match end {
        Some(end) => IngestWindow::ending_on(end, days)?,
        None => IngestWindow::last_days(days)?,
    };
    Ok(window)
}

async fn execute_update(
    cli: &Cli,
    days: u32,
    service: Option<String>,
    end: Option<NaiveDate>,
    retention_days: Option<u32>,
) -> Result<ExitCode> {
    let runtime = build_ingest_runtime(cli)?;
    let request = RunRequest {
        selector: service.map_or(ServiceSelector::All, ServiceSelector::One),
        window: ingest_window(days, end)?,
        retention_days,
    };
    info!(database = %runtime.database.display(), "incident database");

    let (cancel, ctrl_c) = spawn_ctrl_c_watch();
    let result = runtime.orchestrator.run(request, cancel).await;
    ctrl_c.abort();

    let summary = match result {
        Ok(summary) => summary,
        Err(error @ OrchestratorError::Unauthorized(_)) => {
            return Err(error).context("ingestion aborted; check the PagerDuty API token");
        }
        Err(error) => return Err(error).context("ingestion run failed"),
    };
    print!("{}", report::render_run_summary(&summary));

    if summary.has_failures() || summary.cleanup_failed() {
        return Ok(ExitCode::from(EXIT_RUN_FAILED));
    }
    if summary.cancelled {
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    Ok(ExitCode::SUCCESS)
}

async fn execute_refresh(cli: &Cli, incident_id: &str) -> Result<ExitCode> {
    let runtime = build_ingest_runtime(cli)?;
    let refreshed = runtime
        .orchestrator
        .refresh_incident(incident_id)
        .await
        .with_context(|| format!("failed to refresh incident '{incident_id}'"))?;
    print!("{}", report::render_refresh(&refreshed));
    Ok(ExitCode::SUCCESS)
}

async fn execute_read_only(cli: &Cli, mode: CliMode) -> Result<ExitCode> {
    let database = resolve_database_path(cli.database.as_deref(), &cli.config)?;
    let store: Arc<dyn IncidentStore> = open_store(&database)?;

    match mode {
        CliMode::Cleanup { days } => {
            let deleted = store
                .cleanup(days)
                .await
                .context("retention cleanup failed")?;
            println!("retention cleanup: older_than_days={days} deleted={deleted}");
        }
        CliMode::ShowSummary { days } => {
            let analytics = IncidentAnalytics::new(store);
            let window = IngestWindow::last_days(days)?;
            let summary = analytics.summary(&window).await?;
            let top = analytics
                .top_escalated(&window, TOP_ESCALATED_LIMIT)
                .await?;
            print!("{}", report::render_summary(&summary, &top));
        }
        CliMode::ShowEscalations { days } => {
            let analytics = IncidentAnalytics::new(store);
            let escalations = analytics
                .escalations(&IngestWindow::last_days(days)?)
                .await?;
            print!("{}", report::render_escalations(&escalations));
        }
        CliMode::DatabaseInfo => {
            let stats = store.stats().await?;
            print!("{}", report::render_stats(&stats, &database));
        }
        CliMode::GetIncident { incident_id } => {
            let Some(record) = store.get(&incident_id).await? else {
                bail!(
                    "incident '{incident_id}' is not stored in '{}'",
                    database.display()
                );
            };
            print!("{}", report::render_incident(&record));
        }
        CliMode::Serve { bind } => {
            let services = resolve_service_directory(&cli.config)?;
            pulse_dashboard::run_dashboard(bind, store, services).await?;
        }
        CliMode::Update { .. } | CliMode::RefreshIncident { .. } => {
            bail!("command requires a PagerDuty source")
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub(crate) async fn run_cli(cli: Cli) -> Result<ExitCode> {
    let mode = pulse_cli::resolve_cli_mode(&cli, pulse_types::today())?;
    match mode {
        CliMode::Update {
            days,
            service,
            end,
            retention_days,
        } => execute_update(&cli, days, service, end, retention_days).await,
        CliMode::RefreshIncident { incident_id } => execute_refresh(&cli, &incident_id).await,
        read_only => execute_read_only(&cli, read_only).await,
    }
}
