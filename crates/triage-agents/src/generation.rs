//! Response generation step: prompt the generator, extract and parse its
//! JSON, validate the result structurally and against the priority policy.
//!
//! This step owns its whole retry loop because retries change the prompt:
//! a rejected attempt is retried with corrective feedback appended. Two
//! exhaustion outcomes differ deliberately:
//! - schema-invalid or transient to the end: the step fails and the workflow
//!   goes to Failed;
//! - structurally valid but policy-rejected to the end: the response is kept
//!   with its priority forced to MEDIUM and the outcome flagged for human
//!   review, because a usable reply with a conservative tier beats no reply.

use async_trait::async_trait;
use policy::{
    extract_signals, sla_for, validate_priority, GeneratedResponse, Priority, SentimentAssessment,
    TicketEvent,
};
use serde::Deserialize;

use crate::config::Endpoint;
use crate::errors::{RetryPolicy, StepError};
use crate::prompts;

/// Produces a raw completion for a (system, prompt) pair.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, StepError>;
}

#[derive(Debug, serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// HTTP chat-completions generator.
pub struct HttpResponseGenerator {
    client: reqwest::Client,
    endpoint: Endpoint,
    timeout: std::time::Duration,
}

impl HttpResponseGenerator {
    pub fn new(endpoint: Endpoint, timeout: std::time::Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            timeout,
        }
    }
}

#[async_trait]
impl ResponseGenerator for HttpResponseGenerator {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, StepError> {
        let model = self.endpoint.model.as_deref().unwrap_or("default");
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let mut request = self
            .client
            .post(&self.endpoint.url)
            .timeout(self.timeout)
            .json(&body);
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(StepError::Transient(format!("generator returned {status}")));
        }
        if !status.is_success() {
            return Err(StepError::Transient(format!(
                "generator rejected request: {status}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| StepError::Transient(format!("generator response unreadable: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| StepError::Transient("generator returned no choices".into()))
    }
}

/// Extract the JSON payload from a completion that may wrap it in prose or a
/// fenced code block. Fail-closed: `None` when no object can be located.
pub fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(fence_start) = text.find("```json") {
        let after = &text[fence_start + 7..];
        if let Some(fence_end) = after.find("```") {
            return Some(after[..fence_end].trim());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].trim())
}

/// Some generators wrap the payload in an envelope.
#[derive(Debug, Deserialize)]
struct Enveloped {
    output: GeneratedResponse,
}

/// Parse a completion into a `GeneratedResponse`, accepting either the bare
/// object or an `{"output": {...}}` envelope.
pub fn parse_generated(text: &str) -> Result<GeneratedResponse, StepError> {
    let block = extract_json_block(text)
        .ok_or_else(|| StepError::Validation("completion contains no JSON object".into()))?;

    let response = match serde_json::from_str::<GeneratedResponse>(block) {
        Ok(response) => response,
        Err(first) => serde_json::from_str::<Enveloped>(block)
            .map(|e| e.output)
            .map_err(|_| StepError::Validation(format!("completion is not valid JSON: {first}")))?,
    };
    response
        .validate()
        .map_err(|e| StepError::Validation(e.to_string()))?;
    Ok(response)
}

/// Final outcome of the generation step.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub response: GeneratedResponse,
    /// True when the priority was forced to MEDIUM after the generator kept
    /// producing a policy-rejected tier.
    pub policy_flagged: bool,
}

/// Run the full generation step for one ticket, retries included.
pub async fn generate_validated(
    generator: &dyn ResponseGenerator,
    event: &TicketEvent,
    assessment: &SentimentAssessment,
    retry: &RetryPolicy,
) -> Result<GenerationOutcome, StepError> {
    let signals = extract_signals(&format!("{}\n{}", event.subject, event.description));
    let base_prompt = prompts::generation_prompt(event, assessment);

    let mut prompt = base_prompt.clone();
    let mut last_error: Option<StepError> = None;
    let mut last_policy_reject: Option<GeneratedResponse> = None;

    for attempt in 1..=retry.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(retry.delay_for(attempt - 1)).await;
        }

        let completion = match generator.complete(prompts::SYSTEM_ROLE, &prompt).await {
            Ok(text) => text,
            Err(err) if err.is_retriable() => {
                tracing::warn!(
                    ticket_id = %event.ticket_id,
                    attempt,
                    error = %err,
                    "generator call failed"
                );
                last_error = Some(err);
                continue;
            }
            Err(err) => return Err(err),
        };

        let response = match parse_generated(&completion) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    ticket_id = %event.ticket_id,
                    attempt,
                    error = %err,
                    "generated output failed structural validation"
                );
                prompt = base_prompt.clone() + &prompts::corrective_feedback(&err.to_string());
                last_error = Some(err);
                last_policy_reject = None;
                continue;
            }
        };

        match validate_priority(response.priority, assessment.label, &signals) {
            Ok(()) => {
                return Ok(GenerationOutcome {
                    response,
                    policy_flagged: false,
                })
            }
            Err(violation) => {
                tracing::warn!(
                    ticket_id = %event.ticket_id,
                    attempt,
                    claimed = %response.priority,
                    "generated priority rejected by policy"
                );
                prompt =
                    base_prompt.clone() + &prompts::corrective_feedback(&violation.to_string());
                last_error = Some(StepError::Validation(violation.to_string()));
                last_policy_reject = Some(response);
            }
        }
    }

    // Exhausted. A policy-only rejection still yields a usable reply.
    if let Some(mut response) = last_policy_reject {
        let claimed = response.priority;
        response.priority = Priority::Medium;
        response.priority_reasoning = format!(
            "Priority defaulted to MEDIUM ({}): generator repeatedly claimed {} \
             without policy justification",
            sla_for(Priority::Medium),
            claimed,
        );
        tracing::warn!(
            ticket_id = %event.ticket_id,
            claimed = %claimed,
            "retries exhausted on policy validation; defaulting priority to MEDIUM"
        );
        return Ok(GenerationOutcome {
            response,
            policy_flagged: true,
        });
    }

    Err(last_error
        .unwrap_or_else(|| StepError::Transient("generation produced no attempts".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use policy::{SentimentLabel, SentimentScores};

    fn event() -> TicketEvent {
        serde_json::from_str(
            r#"{
                "ticketId": "TKT-20250812-1042",
                "submittedAt": "2025-08-12T14:03:00Z",
                "subject": "Question about S3 storage classes",
                "description": "We would like advice on lifecycle rules for S3.",
                "customer": {
                    "firstName": "Dana",
                    "lastName": "Reyes",
                    "fullName": "Dana Reyes",
                    "email": "dana.reyes@example.com",
                    "company": "Acme Logistics"
                },
                "product": "S3",
                "issueType": "guidance"
            }"#,
        )
        .unwrap()
    }

    fn positive() -> SentimentAssessment {
        SentimentAssessment {
            label: SentimentLabel::Positive,
            scores: SentimentScores {
                mixed: 0.02,
                negative: 0.03,
                neutral: 0.15,
                positive: 0.8,
            },
        }
    }

    fn valid_json(priority: &str) -> String {
        format!(
            r#"{{
                "customer_response": "Thank you for reaching out about S3 lifecycle rules.",
                "priority": "{priority}",
                "priority_reasoning": "Routine guidance request."
            }}"#
        )
    }

    /// Hand-rolled generator returning a scripted sequence of completions
    /// and recording every prompt it received.
    struct ScriptedGenerator {
        script: Mutex<Vec<Result<String, StepError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(script: Vec<Result<String, StepError>>) -> Self {
            Self {
                script: Mutex::new(script),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ResponseGenerator for ScriptedGenerator {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, StepError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.script.lock().unwrap().remove(0)
        }
    }

    fn zero_backoff() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    #[test]
    fn extracts_fenced_block() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json_block(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn extracts_bare_object() {
        assert_eq!(
            extract_json_block("prefix {\"a\": 1} suffix"),
            Some("{\"a\": 1}")
        );
    }

    #[test]
    fn no_object_is_none() {
        assert_eq!(extract_json_block("no json here"), None);
        assert_eq!(extract_json_block("} backwards {"), None);
    }

    #[test]
    fn parses_enveloped_payload() {
        let wrapped = format!(r#"{{"output": {}}}"#, valid_json("NORMAL"));
        let response = parse_generated(&wrapped).unwrap();
        assert_eq!(response.priority, Priority::Normal);
    }

    #[test]
    fn unknown_priority_rejected() {
        let err = parse_generated(&valid_json("CRITICAL")).unwrap_err();
        assert!(matches!(err, StepError::Validation(_)));
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let generator = ScriptedGenerator::new(vec![Ok(valid_json("NORMAL"))]);
        let outcome = generate_validated(&generator, &event(), &positive(), &zero_backoff())
            .await
            .unwrap();
        assert_eq!(outcome.response.priority, Priority::Normal);
        assert!(!outcome.policy_flagged);
    }

    #[tokio::test]
    async fn structural_failure_retried_with_feedback() {
        let generator = ScriptedGenerator::new(vec![
            Ok("not json at all".to_string()),
            Ok(valid_json("NORMAL")),
        ]);
        let outcome = generate_validated(&generator, &event(), &positive(), &zero_backoff())
            .await
            .unwrap();
        assert_eq!(outcome.response.priority, Priority::Normal);

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("previous answer was rejected"));
    }

    #[tokio::test]
    async fn transient_then_success() {
        let generator = ScriptedGenerator::new(vec![
            Err(StepError::Transient("503".into())),
            Ok(valid_json("NORMAL")),
        ]);
        let outcome = generate_validated(&generator, &event(), &positive(), &zero_backoff())
            .await
            .unwrap();
        assert!(!outcome.policy_flagged);
    }

    #[tokio::test]
    async fn policy_exhaustion_defaults_to_medium_flagged() {
        // Positive sentiment, no impact signals: HIGH is never justified.
        let generator = ScriptedGenerator::new(vec![
            Ok(valid_json("HIGH")),
            Ok(valid_json("HIGH")),
            Ok(valid_json("HIGH")),
        ]);
        let outcome = generate_validated(&generator, &event(), &positive(), &zero_backoff())
            .await
            .unwrap();
        assert!(outcome.policy_flagged);
        assert_eq!(outcome.response.priority, Priority::Medium);
        assert!(outcome.response.priority_reasoning.contains("defaulted"));
    }

    #[tokio::test]
    async fn structural_exhaustion_is_an_error() {
        let generator = ScriptedGenerator::new(vec![
            Ok("garbage".to_string()),
            Ok("garbage".to_string()),
            Ok("garbage".to_string()),
        ]);
        let err = generate_validated(&generator, &event(), &positive(), &zero_backoff())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Validation(_)));
    }
}
