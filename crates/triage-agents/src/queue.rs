//! File spool connecting the ticket producer to the pipeline.
//!
//! Pending events are single JSON files in the spool directory. A file is
//! acknowledged (moved to `processed/`) only after its workflow execution
//! reaches a terminal state, so a crash mid-run leaves the event in place
//! for the next run. Files that do not parse as ticket events are moved to
//! `rejected/` and never retried.

use std::path::{Path, PathBuf};

use policy::TicketEvent;

use crate::errors::StepError;

pub struct SpoolQueue {
    dir: PathBuf,
    processed: PathBuf,
    rejected: PathBuf,
}

/// A pending event together with the spool file it came from.
#[derive(Debug)]
pub struct SpooledTicket {
    pub path: PathBuf,
    pub event: TicketEvent,
}

impl SpoolQueue {
    /// Open the spool, creating the directory layout if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StepError> {
        let dir = dir.into();
        let processed = dir.join("processed");
        let rejected = dir.join("rejected");
        for path in [&dir, &processed, &rejected] {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| StepError::Persistence(format!("creating {}: {e}", path.display())))?;
        }
        Ok(Self {
            dir,
            processed,
            rejected,
        })
    }

    /// Write one event into the spool as `<ticket_id>.json`.
    pub async fn enqueue(&self, event: &TicketEvent) -> Result<PathBuf, StepError> {
        let path = self.dir.join(format!("{}.json", event.ticket_id));
        let body = serde_json::to_vec_pretty(event)
            .map_err(|e| StepError::Persistence(format!("serializing event: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| StepError::Persistence(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StepError::Persistence(format!("spooling {}: {e}", path.display())))?;
        Ok(path)
    }

    /// All currently pending events, in filename order. Malformed files are
    /// moved to `rejected/` and skipped.
    pub async fn poll(&self) -> Result<Vec<SpooledTicket>, StepError> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StepError::Persistence(format!("reading spool: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StepError::Persistence(format!("reading spool: {e}")))?
        {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut pending = Vec::new();
        for path in files {
            let body = tokio::fs::read(&path)
                .await
                .map_err(|e| StepError::Persistence(format!("reading {}: {e}", path.display())))?;
            let parsed = serde_json::from_slice::<TicketEvent>(&body)
                .map_err(|e| e.to_string())
                .and_then(|event| event.validate().map(|_| event).map_err(|e| e.to_string()));
            match parsed {
                Ok(event) => pending.push(SpooledTicket { path, event }),
                Err(reason) => {
                    tracing::warn!(
                        file = %path.display(),
                        reason = %reason,
                        "rejecting malformed spool file"
                    );
                    self.move_into(&path, &self.rejected).await?;
                }
            }
        }
        Ok(pending)
    }

    /// Acknowledge a spool file after its execution reached a terminal state.
    pub async fn ack(&self, path: &Path) -> Result<(), StepError> {
        self.move_into(path, &self.processed).await
    }

    async fn move_into(&self, path: &Path, target_dir: &Path) -> Result<(), StepError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| StepError::Persistence(format!("bad spool path {}", path.display())))?;
        tokio::fs::rename(path, target_dir.join(file_name))
            .await
            .map_err(|e| StepError::Persistence(format!("moving {}: {e}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use policy::Customer;

    fn event(ticket_id: &str) -> TicketEvent {
        TicketEvent {
            ticket_id: ticket_id.into(),
            submitted_at: Utc::now(),
            subject: "Lambda timeouts".into(),
            description: "Invocations are timing out after the last deploy.".into(),
            customer: Customer {
                first_name: "Dana".into(),
                last_name: "Reyes".into(),
                full_name: "Dana Reyes".into(),
                email: "dana.reyes@example.com".into(),
                company: "Acme Logistics".into(),
            },
            product: "Lambda".into(),
            issue_type: "performance".into(),
        }
    }

    #[tokio::test]
    async fn enqueue_then_poll_then_ack() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path()).await.unwrap();

        queue.enqueue(&event("TKT-20250812-0002")).await.unwrap();
        queue.enqueue(&event("TKT-20250812-0001")).await.unwrap();

        let pending = queue.poll().await.unwrap();
        assert_eq!(pending.len(), 2);
        // Filename order.
        assert_eq!(pending[0].event.ticket_id, "TKT-20250812-0001");

        queue.ack(&pending[0].path).await.unwrap();
        let remaining = queue.poll().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event.ticket_id, "TKT-20250812-0002");
        assert!(dir
            .path()
            .join("processed")
            .join("TKT-20250812-0001.json")
            .exists());
    }

    #[tokio::test]
    async fn malformed_file_moved_to_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path()).await.unwrap();

        tokio::fs::write(dir.path().join("broken.json"), b"not json")
            .await
            .unwrap();
        queue.enqueue(&event("TKT-20250812-0001")).await.unwrap();

        let pending = queue.poll().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(dir.path().join("rejected").join("broken.json").exists());
        // Rejected files are not seen again.
        assert_eq!(queue.poll().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_event_shape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path()).await.unwrap();

        // Parses as JSON but fails event validation (bad ticket id format).
        let mut bad = event("WRONG-FORMAT");
        bad.ticket_id = "WRONG-FORMAT".into();
        let body = serde_json::to_vec(&bad).unwrap();
        tokio::fs::write(dir.path().join("bad-id.json"), body)
            .await
            .unwrap();

        assert!(queue.poll().await.unwrap().is_empty());
        assert!(dir.path().join("rejected").join("bad-id.json").exists());
    }
}
