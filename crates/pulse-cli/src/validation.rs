use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use crate::Cli;

/// The single action an invocation performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliMode {
    Update {
        days: u32,
        service: Option<String>,
        end: Option<NaiveDate>,
        retention_days: Option<u32>,
    },
    Cleanup {
        days: u32,
    },
    ShowSummary {
        days: u32,
    },
    ShowEscalations {
        days: u32,
    },
    DatabaseInfo,
    GetIncident {
        incident_id: String,
    },
    RefreshIncident {
        incident_id: String,
    },
    Serve {
        bind: SocketAddr,
    },
}

pub fn validate_bind(bind: &str) -> Result<SocketAddr> {
    bind.parse::<SocketAddr>()
        .with_context(|| format!("invalid dashboard socket address '{bind}'"))
}

/// Resolves flags into exactly one mode, rejecting conflicting or dangling flags.
pub fn resolve_cli_mode(cli: &Cli, today: NaiveDate) -> Result<CliMode> {
    let mut selected: Vec<&'static str> = Vec::new();
    if cli.update_incidents.is_some() {
        selected.push("--update-incidents");
    }
    if cli.cleanup.is_some() && cli.update_incidents.is_none() {
        selected.push("--cleanup");
    }
    if cli.show_summary.is_some() {
        selected.push("--show-summary");
    }
    if cli.show_escalations.is_some() {
        selected.push("--show-escalations");
    }
    if cli.database_info {
        selected.push("--database-info");
    }
    if cli.get_incident.is_some() {
        selected.push("--get-incident");
    }
    if cli.refresh_incident.is_some() {
        selected.push("--refresh-incident");
    }
    if cli.serve {
        selected.push("--serve");
    }

    match selected.len() {
        0 => bail!(
            "no command given; pass one of --update-incidents, --cleanup, --show-summary, \
             --show-escalations, --database-info, --get-incident, --refresh-incident, --serve"
        ),
        1 => {}
        _ => bail!("only one command per run, got {}", selected.join(", ")),
    }

    if cli.update_incidents.is_none() {
        if cli.service.is_some() {
            bail!("--service requires --update-incidents");
        }
        if cli.date.is_some() {
            bail!("--date requires --update-incidents");
        }
    }
    if let Some(date) = cli.date {
        if date > today {
            bail!("--date {date} is in the future (today is {today})");
        }
    }

    if let Some(days) = cli.update_incidents {
        return Ok(CliMode::Update {
            days,
            service: cli.service.clone(),
            end: cli.date,
            retention_days: cli.cleanup,
        });
    }
    if let Some(days) = cli.cleanup {
        return Ok(CliMode::Cleanup { days });
    }
    if let Some(days) = cli.show_summary {
        return Ok(CliMode::ShowSummary { days });
    }
    if let Some(days) = cli.show_escalations {
        return Ok(CliMode::ShowEscalations { days });
    }
    if cli.database_info {
        return Ok(CliMode::DatabaseInfo);
    }
    if let Some(incident_id) = &cli.get_incident {
        return Ok(CliMode::GetIncident {
            incident_id: incident_id.clone(),
        });
    }
    if let Some(incident_id) = &cli.refresh_incident {
        return Ok(CliMode::RefreshIncident {
            incident_id: incident_id.clone(),
        });
    }
    Ok(CliMode::Serve {
        bind: validate_bind(&cli.bind)?,
    })
}
