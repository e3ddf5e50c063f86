//! Pipeline configuration: one immutable struct built at process start and
//! passed by reference into each component's constructor.
//!
//! Values come from environment variables, optionally overridden by a TOML
//! file. Missing required configuration is a startup failure — the process
//! aborts before touching any ticket.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// An external capability endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Top-level pipeline configuration. Immutable after construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sentiment classification capability.
    pub classifier: Endpoint,
    /// Response generation capability.
    pub generator: Endpoint,
    /// Directory the producer writes ticket events into and `run` consumes.
    pub spool_dir: PathBuf,
    /// Root of the object store holding processed ticket documents.
    pub store_root: PathBuf,
    /// JSONL file quality verdicts are appended to.
    pub audit_log: PathBuf,
    /// Bookmark file tracking already-exported documents.
    pub bookmark_path: PathBuf,
    /// Optional metadata/warehouse database.
    pub postgres_dsn: Option<String>,
    /// Warehouse table the export job loads into.
    pub warehouse_table: String,
    /// Optional webhook alerts are POSTed to; falls back to log alerts.
    pub alert_webhook: Option<String>,
    /// Maximum attempts per step (first try + retries).
    pub max_attempts: u32,
    /// Deadline for each external capability call.
    pub call_timeout: Duration,
    /// Base delay for exponential backoff between retries.
    pub backoff_base: Duration,
}

/// TOML file shape; every field optional, overriding the environment.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    classifier: Option<Endpoint>,
    generator: Option<Endpoint>,
    spool_dir: Option<PathBuf>,
    store_root: Option<PathBuf>,
    audit_log: Option<PathBuf>,
    bookmark_path: Option<PathBuf>,
    postgres_dsn: Option<String>,
    warehouse_table: Option<String>,
    alert_webhook: Option<String>,
    max_attempts: Option<u32>,
    call_timeout_secs: Option<u64>,
    backoff_base_ms: Option<u64>,
}

impl PipelineConfig {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_lookup(|key| vars.get(key).cloned(), FileConfig::default())
    }

    /// Build from environment plus a TOML override file.
    pub fn from_env_and_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let file: FileConfig = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_lookup(|key| vars.get(key).cloned(), file)
    }

    /// Core constructor, parameterized over the variable lookup for testing.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>, file: FileConfig) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key).with_context(|| format!("missing required environment variable {key}"))
        };

        let classifier = match file.classifier {
            Some(endpoint) => endpoint,
            None => Endpoint {
                url: required("TRIAGE_CLASSIFIER_URL")?,
                api_key: lookup("TRIAGE_CLASSIFIER_API_KEY"),
                model: None,
            },
        };
        let generator = match file.generator {
            Some(endpoint) => endpoint,
            None => Endpoint {
                url: required("TRIAGE_GENERATOR_URL")?,
                api_key: lookup("TRIAGE_GENERATOR_API_KEY"),
                model: Some(required("TRIAGE_GENERATOR_MODEL")?),
            },
        };

        let path_or = |file_value: Option<PathBuf>, key: &str, default: &str| -> PathBuf {
            file_value
                .or_else(|| lookup(key).map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(default))
        };

        let config = Self {
            classifier,
            generator,
            spool_dir: path_or(file.spool_dir, "TRIAGE_SPOOL_DIR", "spool"),
            store_root: path_or(file.store_root, "TRIAGE_STORE_ROOT", "data"),
            audit_log: path_or(file.audit_log, "TRIAGE_AUDIT_LOG", "audit/verdicts.jsonl"),
            bookmark_path: path_or(
                file.bookmark_path,
                "TRIAGE_EXPORT_BOOKMARK",
                "export/bookmark.jsonl",
            ),
            postgres_dsn: file.postgres_dsn.or_else(|| lookup("TRIAGE_POSTGRES_DSN")),
            warehouse_table: file
                .warehouse_table
                .or_else(|| lookup("TRIAGE_WAREHOUSE_TABLE"))
                .unwrap_or_else(|| "processed_tickets".into()),
            alert_webhook: file.alert_webhook.or_else(|| lookup("TRIAGE_ALERT_WEBHOOK")),
            max_attempts: file
                .max_attempts
                .or_else(|| lookup("TRIAGE_MAX_ATTEMPTS").and_then(|v| v.parse().ok()))
                .unwrap_or(3),
            call_timeout: Duration::from_secs(
                file.call_timeout_secs
                    .or_else(|| lookup("TRIAGE_CALL_TIMEOUT_SECS").and_then(|v| v.parse().ok()))
                    .unwrap_or(30),
            ),
            backoff_base: Duration::from_millis(
                file.backoff_base_ms
                    .or_else(|| lookup("TRIAGE_BACKOFF_BASE_MS").and_then(|v| v.parse().ok()))
                    .unwrap_or(200),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_attempts >= 1, "max_attempts must be at least 1");
        anyhow::ensure!(
            !self.classifier.url.trim().is_empty(),
            "classifier url must be non-empty"
        );
        anyhow::ensure!(
            !self.generator.url.trim().is_empty(),
            "generator url must be non-empty"
        );
        Ok(())
    }
}
