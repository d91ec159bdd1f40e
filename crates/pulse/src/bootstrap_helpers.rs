use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pulse_orchestrator::config::DEFAULT_DATABASE_PATH;
use pulse_orchestrator::PulseConfig;
use pulse_source::ServiceDirectory;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn load_config(path: &Path) -> Result<PulseConfig> {
    PulseConfig::load(path)
        .with_context(|| format!("failed to load config '{}'", path.display()))
}

/// Resolves the database path for read-only commands, which run without a config file.
pub(crate) fn resolve_database_path(
    database_override: Option<&Path>,
    config_path: &Path,
) -> Result<PathBuf> {
    if let Some(path) = database_override {
        return Ok(path.to_path_buf());
    }
    if config_path.exists() {
        return Ok(load_config(config_path)?.database_path());
    }
    Ok(PathBuf::from(DEFAULT_DATABASE_PATH))
}

/// Configured services for the dashboard; empty when no config file or no services exist.
pub(crate) fn resolve_service_directory(config_path: &Path) -> Result<ServiceDirectory> {
    if !config_path.exists() {
        return Ok(ServiceDirectory::new());
    }
    let config = load_config(config_path)?;
    if config.services.is_empty() {
        return Ok(ServiceDirectory::new());
    }
    config
        .service_directory()
        .with_context(|| format!("invalid services in '{}'", config_path.display()))
}
