//! Warehouse export batch job.
//!
//! Scans the object store for processed ticket documents, skips everything
//! already exported (bookmark file), validates the batch against the
//! warehouse schema, and loads it. The null gate is all-or-nothing: a single
//! null anywhere aborts the whole batch before any row is loaded, and the
//! bookmark is committed only after a successful load, so a failed run
//! re-exports the same documents next time.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use policy::warehouse::{schema, validate_no_nulls, validate_types, ColumnType};
use serde_json::Value;
use tokio_postgres::types::ToSql;

use crate::errors::StepError;
use crate::persistence::ObjectStore;

/// Append-only record of already-exported storage keys, one per line.
pub struct Bookmark {
    path: PathBuf,
}

impl Bookmark {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<BTreeSet<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(e).with_context(|| format!("reading bookmark {}", self.path.display())),
        }
    }

    /// Record keys as exported. Called only after a successful load.
    pub async fn commit(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let existing = self.load().await?;
        let mut text = String::new();
        for key in keys {
            if !existing.contains(key) {
                text.push_str(key);
                text.push('\n');
            }
        }
        let mut combined = tokio::fs::read_to_string(&self.path)
            .await
            .unwrap_or_default();
        combined.push_str(&text);
        tokio::fs::write(&self.path, combined)
            .await
            .with_context(|| format!("writing bookmark {}", self.path.display()))?;
        Ok(())
    }
}

/// Destination table loader.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Load all documents into `table`; returns rows written. Must be
    /// all-or-nothing per call.
    async fn load(&self, table: &str, documents: &[Value]) -> Result<u64, StepError>;
}

/// Postgres-backed sink inserting one row per document, columns per the
/// warehouse schema.
pub struct PostgresSink {
    client: tokio_postgres::Client,
}

impl PostgresSink {
    pub async fn connect(dsn: &str) -> Result<Self, StepError> {
        let (client, connection) = tokio_postgres::connect(dsn, tokio_postgres::NoTls)
            .await
            .map_err(|e| StepError::Persistence(format!("connecting to warehouse: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "warehouse connection closed");
            }
        });
        Ok(Self { client })
    }

    fn insert_statement(table: &str) -> String {
        let columns: Vec<&str> = schema().iter().map(|(name, _)| *name).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
        format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT (ticket_id) DO NOTHING",
            columns.join(", "),
            placeholders.join(", "),
        )
    }
}

/// One document's column values in schema order, owned so they can be
/// borrowed as query parameters.
enum ColumnValue {
    Text(String),
    Double(f64),
    Timestamp(DateTime<Utc>),
}

impl ColumnValue {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Text(v) => v,
            Self::Double(v) => v,
            Self::Timestamp(v) => v,
        }
    }
}

fn document_row(document: &Value) -> Result<Vec<ColumnValue>, StepError> {
    let mut row = Vec::with_capacity(schema().len());
    for (name, column_type) in schema() {
        let value = document
            .get(name)
            .ok_or_else(|| StepError::Validation(format!("document missing column {name}")))?;
        let column = match column_type {
            ColumnType::Text => ColumnValue::Text(
                value
                    .as_str()
                    .ok_or_else(|| StepError::Validation(format!("column {name} is not text")))?
                    .to_string(),
            ),
            ColumnType::Double => ColumnValue::Double(value.as_f64().ok_or_else(|| {
                StepError::Validation(format!("column {name} is not a number"))
            })?),
            ColumnType::Timestamp => {
                let text = value.as_str().ok_or_else(|| {
                    StepError::Validation(format!("column {name} is not a timestamp"))
                })?;
                let parsed = DateTime::parse_from_rfc3339(text).map_err(|e| {
                    StepError::Validation(format!("column {name} bad timestamp: {e}"))
                })?;
                ColumnValue::Timestamp(parsed.with_timezone(&Utc))
            }
        };
        row.push(column);
    }
    Ok(row)
}

#[async_trait]
impl WarehouseSink for PostgresSink {
    async fn load(&self, table: &str, documents: &[Value]) -> Result<u64, StepError> {
        let statement = Self::insert_statement(table);
        let mut loaded = 0u64;
        for document in documents {
            let row = document_row(document)?;
            let params: Vec<&(dyn ToSql + Sync)> = row.iter().map(ColumnValue::as_sql).collect();
            loaded += self
                .client
                .execute(&statement, &params)
                .await
                .map_err(|e| StepError::Persistence(format!("loading into {table}: {e}")))?;
        }
        Ok(loaded)
    }
}

/// Documents selected for export, with the keys they came from.
pub struct ExportBatch {
    pub keys: Vec<String>,
    pub documents: Vec<Value>,
}

/// Select and validate the next batch: everything under `tickets/` that is
/// not bookmarked yet. Validation failure aborts the batch before load.
pub async fn prepare_batch(store: &dyn ObjectStore, bookmark: &Bookmark) -> Result<ExportBatch> {
    let exported = bookmark.load().await?;
    let all_keys = store
        .list("tickets")
        .await
        .context("listing processed documents")?;

    let mut keys = Vec::new();
    let mut documents = Vec::new();
    for key in all_keys {
        if exported.contains(&key) {
            continue;
        }
        let body = store
            .get(&key)
            .await?
            .with_context(|| format!("document {key} vanished during export"))?;
        let document: Value =
            serde_json::from_slice(&body).with_context(|| format!("parsing document {key}"))?;
        keys.push(key);
        documents.push(document);
    }

    validate_no_nulls(&documents).context("null-value gate rejected the batch")?;
    validate_types(&documents).context("type gate rejected the batch")?;
    Ok(ExportBatch { keys, documents })
}

#[derive(Debug, PartialEq, Eq)]
pub struct ExportSummary {
    pub loaded: u64,
    pub selected: usize,
}

/// Run one export: select, validate, load, then bookmark.
pub async fn run_export(
    store: &dyn ObjectStore,
    sink: &dyn WarehouseSink,
    table: &str,
    bookmark: &Bookmark,
) -> Result<ExportSummary> {
    let batch = prepare_batch(store, bookmark).await?;
    if batch.documents.is_empty() {
        tracing::info!("nothing new to export");
        return Ok(ExportSummary {
            loaded: 0,
            selected: 0,
        });
    }

    let loaded = sink
        .load(table, &batch.documents)
        .await
        .context("warehouse load failed; bookmark not advanced")?;
    bookmark.commit(&batch.keys).await?;
    tracing::info!(
        selected = batch.keys.len(),
        loaded,
        "export batch committed"
    );
    Ok(ExportSummary {
        loaded,
        selected: batch.keys.len(),
    })
}
