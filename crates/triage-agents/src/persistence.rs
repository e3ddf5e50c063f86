//! Idempotent persistence of processed ticket records.
//!
//! Records are stored as JSON documents under a date-partitioned key derived
//! from the processing timestamp and the ticket id. Reprocessing the same
//! ticket on the same day produces the same key, so the write overwrites
//! rather than duplicates. An optional relational table mirrors the record
//! for operational queries, upserting on ticket id.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use policy::ProcessedTicketRecord;

use crate::errors::StepError;

/// Date-partitioned storage key for a processed record.
///
/// `tickets/<year>/<month>/<day>/ticket_<ticketId>.json`, month and day
/// zero-padded to two digits.
pub fn storage_key(ticket_id: &str, processed_at: DateTime<Utc>) -> String {
    format!(
        "tickets/{}/{:02}/{:02}/ticket_{}.json",
        processed_at.year(),
        processed_at.month(),
        processed_at.day(),
        ticket_id,
    )
}

/// Flat key/value document store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` at `key`, replacing any existing document.
    async fn put(&self, key: &str, body: &[u8]) -> Result<(), StepError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StepError>;
    /// All keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StepError>;
}

/// Filesystem-backed object store rooted at a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// cancelled or crashed write never leaves a partial document at the key.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, body: &[u8]) -> Result<(), StepError> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StepError::Persistence(format!("creating {}: {e}", parent.display())))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| StepError::Persistence(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StepError::Persistence(format!("renaming into {}: {e}", path.display())))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StepError> {
        match tokio::fs::read(self.resolve(key)).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StepError::Persistence(format!("reading {key}: {e}"))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StepError> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.join(prefix)];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StepError::Persistence(format!(
                        "listing {}: {e}",
                        dir.display()
                    )))
                }
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StepError::Persistence(format!("listing {}: {e}", dir.display())))?
            {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        keys.push(relative.to_string_lossy().replace('\\', "/"));
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Optional relational mirror of processed records.
pub struct TicketTable {
    client: tokio_postgres::Client,
}

impl TicketTable {
    /// Connect and spawn the connection driver task.
    pub async fn connect(dsn: &str) -> Result<Self, StepError> {
        let (client, connection) = tokio_postgres::connect(dsn, tokio_postgres::NoTls)
            .await
            .map_err(|e| StepError::Persistence(format!("connecting to postgres: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection closed");
            }
        });
        Ok(Self { client })
    }

    /// Upsert one record keyed by ticket id.
    pub async fn upsert(&self, record: &ProcessedTicketRecord) -> Result<(), StepError> {
        let priority = record.priority.to_string();
        let sentiment = record.sentiment.to_string();
        self.client
            .execute(
                "INSERT INTO processed_tickets \
                 (ticket_id, submitted_at, customer_email, product, issue_type, \
                  sentiment, priority, priority_reasoning, response_text, processed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (ticket_id) DO UPDATE SET \
                  sentiment = EXCLUDED.sentiment, \
                  priority = EXCLUDED.priority, \
                  priority_reasoning = EXCLUDED.priority_reasoning, \
                  response_text = EXCLUDED.response_text, \
                  processed_at = EXCLUDED.processed_at",
                &[
                    &record.ticket_id,
                    &record.submitted_at,
                    &record.customer_email,
                    &record.product,
                    &record.issue_type,
                    &sentiment,
                    &priority,
                    &record.priority_reasoning,
                    &record.response_text,
                    &record.processed_at,
                ],
            )
            .await
            .map_err(|e| StepError::Persistence(format!("upserting {}: {e}", record.ticket_id)))?;
        Ok(())
    }
}

/// Persistence step: serialize the record and store it, mirroring to the
/// relational table when one is configured.
pub struct PersistenceWriter {
    store: std::sync::Arc<dyn ObjectStore>,
    table: Option<TicketTable>,
}

impl PersistenceWriter {
    pub fn new(store: std::sync::Arc<dyn ObjectStore>, table: Option<TicketTable>) -> Self {
        Self { store, table }
    }

    /// Write the record; returns the storage key it landed at.
    pub async fn write(&self, record: &ProcessedTicketRecord) -> Result<String, StepError> {
        let key = storage_key(&record.ticket_id, record.processed_at);
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| StepError::Persistence(format!("serializing record: {e}")))?;
        self.store.put(&key, &body).await?;
        if let Some(table) = &self.table {
            table.upsert(record).await?;
        }
        tracing::info!(ticket_id = %record.ticket_id, key = %key, "record persisted");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_is_date_partitioned_and_zero_padded() {
        let processed_at = Utc.with_ymd_and_hms(2025, 8, 5, 14, 3, 0).unwrap();
        assert_eq!(
            storage_key("TKT-20250805-1042", processed_at),
            "tickets/2025/08/05/ticket_TKT-20250805-1042.json"
        );
    }

    #[test]
    fn key_is_deterministic_for_same_day() {
        let morning = Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 1).unwrap();
        let night = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            storage_key("TKT-20251231-0001", morning),
            storage_key("TKT-20251231-0001", night)
        );
    }

    #[tokio::test]
    async fn fs_store_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .put("tickets/2025/08/05/ticket_a.json", b"first")
            .await
            .unwrap();
        store
            .put("tickets/2025/08/05/ticket_a.json", b"second")
            .await
            .unwrap();

        let body = store
            .get("tickets/2025/08/05/ticket_a.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, b"second");
        assert!(store.get("tickets/2025/08/05/missing.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fs_store_lists_recursively_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("tickets/2025/08/06/ticket_b.json", b"{}").await.unwrap();
        store.put("tickets/2025/08/05/ticket_a.json", b"{}").await.unwrap();
        store.put("tickets/2025/07/30/ticket_c.json", b"{}").await.unwrap();

        let keys = store.list("tickets").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "tickets/2025/07/30/ticket_c.json",
                "tickets/2025/08/05/ticket_a.json",
                "tickets/2025/08/06/ticket_b.json",
            ]
        );
    }

    #[tokio::test]
    async fn list_of_missing_prefix_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.list("tickets").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_tmp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("tickets/2025/08/05/ticket_a.json", b"{}").await.unwrap();

        let keys = store.list("tickets").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(!keys[0].ends_with(".tmp"));
    }
}
