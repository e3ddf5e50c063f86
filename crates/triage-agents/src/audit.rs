//! Response quality audit batch job.
//!
//! Re-reads persisted ticket records, scores each stored response against
//! the four-criterion rubric, and appends one JSONL verdict per record.
//! Best-effort by design: an unreadable record is logged and skipped, and
//! the audit never mutates the records it reads.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use policy::{rubric, ProcessedTicketRecord, QualityVerdict};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::persistence::ObjectStore;

/// One appended audit line.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ticket_id: String,
    pub verdict: QualityVerdict,
    pub all_pass: bool,
    pub audited_at: DateTime<Utc>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AuditSummary {
    pub audited: usize,
    pub passed: usize,
    pub skipped: usize,
}

/// Audit every persisted record, appending verdicts to `log_path`.
pub async fn run_audit(store: &dyn ObjectStore, log_path: &Path) -> Result<AuditSummary> {
    let keys = store
        .list("tickets")
        .await
        .context("listing processed documents")?;

    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
        .with_context(|| format!("opening audit log {}", log_path.display()))?;

    let mut summary = AuditSummary::default();
    for key in keys {
        let record = match read_record(store, &key).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "skipping unauditable record");
                summary.skipped += 1;
                continue;
            }
        };

        let verdict = rubric::evaluate(&record.subject, &record.description, &record.response_text);
        let entry = AuditEntry {
            ticket_id: record.ticket_id.clone(),
            all_pass: verdict.all_pass(),
            verdict,
            audited_at: Utc::now(),
        };
        if !entry.all_pass {
            tracing::info!(
                ticket_id = %entry.ticket_id,
                failed = ?entry.verdict.failed_criteria(),
                "response failed quality rubric"
            );
        }

        let mut line = serde_json::to_string(&entry).context("serializing audit entry")?;
        line.push('\n');
        log.write_all(line.as_bytes())
            .await
            .with_context(|| format!("appending to {}", log_path.display()))?;

        summary.audited += 1;
        if entry.all_pass {
            summary.passed += 1;
        }
    }
    log.flush().await.context("flushing audit log")?;

    tracing::info!(
        audited = summary.audited,
        passed = summary.passed,
        skipped = summary.skipped,
        "audit run finished"
    );
    Ok(summary)
}

async fn read_record(store: &dyn ObjectStore, key: &str) -> Result<ProcessedTicketRecord> {
    let body = store
        .get(key)
        .await?
        .with_context(|| format!("document {key} vanished during audit"))?;
    serde_json::from_slice(&body).with_context(|| format!("parsing document {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::persistence::FsObjectStore;

    fn record(ticket_id: &str, response_text: &str) -> serde_json::Value {
        serde_json::json!({
            "ticket_id": ticket_id,
            "submitted_at": "2025-08-12T14:03:00Z",
            "customer_first_name": "Dana",
            "customer_last_name": "Reyes",
            "customer_full_name": "Dana Reyes",
            "customer_email": "dana.reyes@example.com",
            "product": "RDS",
            "issue_type": "availability",
            "subject": "RDS connection pool exhausted in production",
            "description": "Our production RDS instance is refusing connections.",
            "response_text": response_text,
            "sentiment": "NEGATIVE",
            "sentiment_score_mixed": 0.02,
            "sentiment_score_negative": 0.9,
            "sentiment_score_neutral": 0.05,
            "sentiment_score_positive": 0.03,
            "priority": "HIGH",
            "priority_reasoning": "Negative sentiment with production outage.",
            "processed_at": "2025-08-12T15:00:00Z"
        })
    }

    const GOOD_RESPONSE: &str = "Thank you for reporting the RDS connection pool problem in \
your production environment. We understand connections are being refused.\n\
1. Open the RDS console and review the DatabaseConnections metric for the affected instance.\n\
2. Check the database error logs for connection limit messages.\n\
3. Raise the max_connections parameter in the parameter group via the console if the pool is saturated.";

    #[tokio::test]
    async fn audits_all_records_and_appends_jsonl() {
        let store_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(store_dir.path());
        for (id, response) in [
            ("TKT-20250812-0001", GOOD_RESPONSE),
            ("TKT-20250812-0002", "It's broken!!! Try turning it off and on."),
        ] {
            let body = serde_json::to_vec(&record(id, response)).unwrap();
            store
                .put(&format!("tickets/2025/08/12/ticket_{id}.json"), &body)
                .await
                .unwrap();
        }

        let log_path = log_dir.path().join("verdicts.jsonl");
        let summary = run_audit(&store, &log_path).await.unwrap();
        assert_eq!(summary.audited, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.skipped, 0);

        let text = tokio::fs::read_to_string(&log_path).await.unwrap();
        let entries: Vec<AuditEntry> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        let sloppy = entries
            .iter()
            .find(|e| e.ticket_id == "TKT-20250812-0002")
            .unwrap();
        assert!(!sloppy.all_pass);
        assert!(!sloppy.verdict.professional_tone);
    }

    #[tokio::test]
    async fn unreadable_record_skipped_not_fatal() {
        let store_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(store_dir.path());

        store
            .put("tickets/2025/08/12/ticket_bad.json", b"not json")
            .await
            .unwrap();
        let body = serde_json::to_vec(&record("TKT-20250812-0001", GOOD_RESPONSE)).unwrap();
        store
            .put("tickets/2025/08/12/ticket_TKT-20250812-0001.json", &body)
            .await
            .unwrap();

        let log_path = log_dir.path().join("verdicts.jsonl");
        let summary = run_audit(&store, &log_path).await.unwrap();
        assert_eq!(summary.audited, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn repeated_runs_append() {
        let store_dir = tempfile::tempdir().unwrap();
        let log_dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(store_dir.path());
        let body = serde_json::to_vec(&record("TKT-20250812-0001", GOOD_RESPONSE)).unwrap();
        store
            .put("tickets/2025/08/12/ticket_TKT-20250812-0001.json", &body)
            .await
            .unwrap();

        let log_path = log_dir.path().join("verdicts.jsonl");
        run_audit(&store, &log_path).await.unwrap();
        run_audit(&store, &log_path).await.unwrap();
        let text = tokio::fs::read_to_string(&log_path).await.unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
