use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

pub const DEFAULT_UPDATE_DAYS: &str = "7";
pub const DEFAULT_REPORT_DAYS: &str = "7";
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|error| format!("expected YYYY-MM-DD: {error}"))
}

fn parse_non_empty(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value must not be empty".to_string());
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "pulse",
    about = "PagerDuty incident ingestion and escalation metrics",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "PULSE_CONFIG",
        default_value = "pulse.toml",
        help = "Path to the TOML config with the API token and services"
    )]
    pub config: PathBuf,

    #[arg(
        long,
        env = "PULSE_DATABASE",
        help = "SQLite database path; overrides `database` from the config"
    )]
    pub database: Option<PathBuf>,

    #[arg(
        long = "api-token",
        env = "PULSE_API_TOKEN",
        hide_env_values = true,
        help = "PagerDuty API token; overrides `token` from the config"
    )]
    pub api_token: Option<String>,

    #[arg(
        long = "update-incidents",
        value_name = "DAYS",
        num_args = 0..=1,
        default_missing_value = DEFAULT_UPDATE_DAYS,
        value_parser = parse_positive_u32,
        help = "Fetch and store incidents created in the last DAYS days (default 7)"
    )]
    pub update_incidents: Option<u32>,

    #[arg(
        long,
        value_name = "SERVICE_ID",
        value_parser = parse_non_empty,
        help = "Restrict --update-incidents to one configured service id"
    )]
    pub service: Option<String>,

    #[arg(
        long,
        value_name = "YYYY-MM-DD",
        value_parser = parse_date,
        help = "Last day of the --update-incidents window (default today, UTC-7)"
    )]
    pub date: Option<NaiveDate>,

    #[arg(
        long,
        value_name = "DAYS",
        value_parser = parse_positive_u32,
        help = "Delete incidents created more than DAYS days ago; runs after --update-incidents when combined"
    )]
    pub cleanup: Option<u32>,

    #[arg(
        long = "show-summary",
        value_name = "DAYS",
        num_args = 0..=1,
        default_missing_value = DEFAULT_REPORT_DAYS,
        value_parser = parse_positive_u32,
        help = "Print incident and escalation metrics for the last DAYS days"
    )]
    pub show_summary: Option<u32>,

    #[arg(
        long = "show-escalations",
        value_name = "DAYS",
        num_args = 0..=1,
        default_missing_value = DEFAULT_REPORT_DAYS,
        value_parser = parse_positive_u32,
        help = "List escalated incidents from the last DAYS days"
    )]
    pub show_escalations: Option<u32>,

    #[arg(
        long = "database-info",
        help = "Print record counts and the stored date span"
    )]
    pub database_info: bool,

    #[arg(
        long = "get-incident",
        value_name = "INCIDENT_ID",
        value_parser = parse_non_empty,
        help = "Print one stored incident"
    )]
    pub get_incident: Option<String>,

    #[arg(
        long = "refresh-incident",
        value_name = "INCIDENT_ID",
        value_parser = parse_non_empty,
        help = "Re-fetch one incident from PagerDuty and store it"
    )]
    pub refresh_incident: Option<String>,

    #[arg(long, help = "Serve the dashboard JSON API")]
    pub serve: bool,

    #[arg(
        long,
        env = "PULSE_BIND",
        default_value = DEFAULT_BIND,
        help = "Socket address for --serve"
    )]
    pub bind: String,
}
