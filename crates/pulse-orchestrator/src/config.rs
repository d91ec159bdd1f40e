//! `pulse.toml` configuration model.

use pulse_source::{
    service_id_from_url, PagerDutyAuthScheme, PagerDutyConfig, RetryPolicy, ServiceDirectory,
    DEFAULT_API_BASE, DEFAULT_MAX_IN_FLIGHT, DEFAULT_REQUEST_TIMEOUT_MS,
};
use pulse_types::EnrichmentRules;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::OrchestratorConfig;

pub const DEFAULT_CONFIG_PATH: &str = "pulse.toml";
pub const DEFAULT_DATABASE_PATH: &str = "incidents.sqlite";
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_BATCH_PAUSE_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing PagerDuty API token; set `token` in the config or PULSE_API_TOKEN")]
    MissingToken,
    #[error("no services configured")]
    NoServices,
    #[error("service '{name}': {detail}")]
    InvalidService { name: String, detail: String },
    #[error("invalid value for '{field}': {detail}")]
    InvalidValue { field: &'static str, detail: String },
}

/// One `[[services]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceEntry {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl ServiceEntry {
    /// Explicit `id` wins; otherwise the id is taken from the tail of `url`.
    pub fn service_id(&self) -> Result<String, ConfigError> {
        if let Some(id) = self.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }
        let Some(url) = self.url.as_deref() else {
            return Err(ConfigError::InvalidService {
                name: self.name.clone(),
                detail: "needs either `id` or `url`".to_string(),
            });
        };
        service_id_from_url(url).ok_or_else(|| ConfigError::InvalidService {
            name: self.name.clone(),
            detail: format!("no service id at the end of url '{url}'"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichmentSection {
    #[serde(default)]
    pub resolution_team: Option<String>,
    #[serde(default)]
    pub root_cause_taxonomy: Option<Vec<String>>,
}

impl EnrichmentSection {
    pub fn rules(&self) -> EnrichmentRules {
        let defaults = EnrichmentRules::default();
        let literal = self
            .resolution_team
            .as_deref()
            .unwrap_or(defaults.resolution_team_literal.as_str());
        match &self.root_cause_taxonomy {
            Some(taxonomy) => EnrichmentRules::new(literal, taxonomy),
            None => EnrichmentRules::new(literal, &defaults.root_cause_taxonomy),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_max_attempts() -> usize {
    RetryPolicy::default().max_attempts
}

fn default_base_backoff_ms() -> u64 {
    RetryPolicy::default().base_backoff_ms
}

fn default_jitter() -> bool {
    true
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            jitter: default_jitter(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_pause_ms() -> u64 {
    DEFAULT_BATCH_PAUSE_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

/// Parsed `pulse.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PulseConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub auth_scheme: Option<PagerDutyAuthScheme>,
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub enrichment: EnrichmentSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub ingest: IngestSection,
}

impl PulseConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks numeric settings; service and token checks happen when they are needed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ingest.batch_size",
                detail: "must be greater than 0".to_string(),
            });
        }
        if self.http.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.max_attempts",
                detail: "must be greater than 0".to_string(),
            });
        }
        if self.http.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.max_in_flight",
                detail: "must be greater than 0".to_string(),
            });
        }
        if self.http.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.request_timeout_ms",
                detail: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH))
    }

    /// A non-blank override (CLI flag or `PULSE_API_TOKEN`) beats the file token.
    pub fn resolve_token(&self, token_override: Option<&str>) -> Result<String, ConfigError> {
        let non_blank = |token: &&str| !token.trim().is_empty();
        token_override
            .filter(non_blank)
            .or(self.token.as_deref().filter(non_blank))
            .map(|token| token.trim().to_string())
            .ok_or(ConfigError::MissingToken)
    }

    pub fn service_directory(&self) -> Result<ServiceDirectory, ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        let mut directory = ServiceDirectory::new();
        for entry in &self.services {
            directory.insert(entry.service_id()?, entry.name.trim());
        }
        Ok(directory)
    }

    pub fn pagerduty_config(
        &self,
        token_override: Option<&str>,
    ) -> Result<PagerDutyConfig, ConfigError> {
        let token = self.resolve_token(token_override)?;
        let mut config = PagerDutyConfig::new(token, self.service_directory()?);
        config.api_base = self
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        config.auth_scheme = self.auth_scheme.unwrap_or_default();
        config.request_timeout_ms = self.http.request_timeout_ms;
        config.retry = RetryPolicy {
            max_attempts: self.http.max_attempts,
            base_backoff_ms: self.http.base_backoff_ms,
            jitter: self.http.jitter,
        };
        config.max_in_flight = self.http.max_in_flight;
        config.rules = self.enrichment.rules();
        Ok(config)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            batch_size: self.ingest.batch_size,
            batch_pause: Duration::from_millis(self.ingest.batch_pause_ms),
        }
    }
}
