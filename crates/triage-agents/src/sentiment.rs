//! Sentiment classification step.
//!
//! The classifier is behind a trait so the orchestrator can be exercised
//! against mocks. The production implementation calls an HTTP capability
//! that accepts `{"text": ...}` and returns a label plus per-label scores.

use std::time::Duration;

use async_trait::async_trait;
use policy::{SentimentAssessment, SentimentLabel, SentimentScores};
use serde::{Deserialize, Serialize};

use crate::config::Endpoint;
use crate::errors::StepError;

/// Classifies the emotional tone of a ticket's text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<SentimentAssessment, StepError>;
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    label: SentimentLabel,
    scores: SentimentScores,
}

/// HTTP-backed classifier.
pub struct HttpSentimentClassifier {
    client: reqwest::Client,
    endpoint: Endpoint,
    timeout: Duration,
}

impl HttpSentimentClassifier {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl SentimentClassifier for HttpSentimentClassifier {
    async fn classify(&self, text: &str) -> Result<SentimentAssessment, StepError> {
        let mut request = self
            .client
            .post(&self.endpoint.url)
            .timeout(self.timeout)
            .json(&ClassifyRequest { text });
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(StepError::Transient(format!(
                "classifier returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(StepError::Validation(format!(
                "classifier rejected request: {status}"
            )));
        }

        let body: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| StepError::Transient(format!("classifier response unreadable: {e}")))?;
        body.scores
            .validate()
            .map_err(|e| StepError::Validation(format!("classifier scores invalid: {e}")))?;

        tracing::debug!(label = ?body.label, "sentiment classified");
        Ok(SentimentAssessment {
            label: body.label,
            scores: body.scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_response_deserializes() {
        let body: ClassifyResponse = serde_json::from_str(
            r#"{
                "label": "NEGATIVE",
                "scores": {
                    "positive": 0.02,
                    "negative": 0.91,
                    "neutral": 0.05,
                    "mixed": 0.02
                }
            }"#,
        )
        .unwrap();
        assert_eq!(body.label, SentimentLabel::Negative);
        assert!(body.scores.validate().is_ok());
    }

    #[test]
    fn out_of_range_scores_fail_validation() {
        let body: ClassifyResponse = serde_json::from_str(
            r#"{
                "label": "POSITIVE",
                "scores": {
                    "positive": 1.4,
                    "negative": 0.0,
                    "neutral": 0.0,
                    "mixed": 0.0
                }
            }"#,
        )
        .unwrap();
        assert!(body.scores.validate().is_err());
    }

    #[tokio::test]
    async fn mock_classifier_usable_from_async_context() {
        let mut mock = MockSentimentClassifier::new();
        mock.expect_classify().returning(|_| {
            Ok(SentimentAssessment {
                label: SentimentLabel::Neutral,
                scores: SentimentScores {
                    positive: 0.1,
                    negative: 0.1,
                    neutral: 0.7,
                    mixed: 0.1,
                },
            })
        });
        let assessment = mock.classify("printer on fire").await.unwrap();
        assert_eq!(assessment.label, SentimentLabel::Neutral);
    }
}
