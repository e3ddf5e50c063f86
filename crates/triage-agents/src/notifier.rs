//! Failure alerting.
//!
//! Exactly one alert per failed workflow execution, emitted when a step
//! exhausts its retry budget. Alert delivery is best-effort: a failed
//! delivery is logged and swallowed so it can never mask or compound the
//! original failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload describing a failed workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureAlert {
    pub ticket_id: String,
    /// Name of the workflow state the execution failed in.
    pub failed_step: String,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

/// Delivers failure alerts to an operations channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn notify(&self, alert: &FailureAlert);
}

/// POSTs alerts as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl FailureNotifier for WebhookNotifier {
    async fn notify(&self, alert: &FailureAlert) {
        let result = self.client.post(&self.url).json(alert).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!(ticket_id = %alert.ticket_id, "failure alert delivered");
            }
            Ok(response) => {
                tracing::error!(
                    ticket_id = %alert.ticket_id,
                    status = %response.status(),
                    "failure alert rejected by webhook"
                );
            }
            Err(e) => {
                tracing::error!(
                    ticket_id = %alert.ticket_id,
                    error = %e,
                    "failure alert delivery failed"
                );
            }
        }
    }
}

/// Fallback notifier that writes alerts to the structured log.
pub struct LogNotifier;

#[async_trait]
impl FailureNotifier for LogNotifier {
    async fn notify(&self, alert: &FailureAlert) {
        tracing::error!(
            ticket_id = %alert.ticket_id,
            failed_step = %alert.failed_step,
            error = %alert.error,
            occurred_at = %alert.occurred_at,
            "workflow execution failed"
        );
    }
}
