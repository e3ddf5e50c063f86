//! Shared data model: ticket events, sentiment, generated responses, and the
//! flattened processed record that persistence and export operate on.
//!
//! Every type here is a wire contract. `TicketEvent` is what the producer
//! emits, `GeneratedResponse` is what the generation capability must return
//! (parsed fail-closed), and `ProcessedTicketRecord` is the denormalized
//! union written to the object store and loaded into the warehouse.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Products the triage system knows how to talk about. Used by the producer's
/// scenario table and by the rubric's foreign-product check.
pub const KNOWN_PRODUCTS: &[&str] = &[
    "RDS",
    "EC2",
    "Lambda",
    "S3",
    "DynamoDB",
    "CloudFront",
    "EKS",
    "API Gateway",
];

fn ticket_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^TKT-\d{8}-\d{4}$").expect("ticket id pattern"))
}

/// Validation failure for an inbound event or assessment.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("field `{0}` must be non-empty")]
    EmptyField(&'static str),
    #[error("ticket id `{0}` does not match TKT-<date>-<4 digits>")]
    BadTicketId(String),
    #[error("sentiment score `{field}` = {value} outside [0, 1]")]
    ScoreOutOfRange { field: &'static str, value: f64 },
}

/// Customer contact information attached to a ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    pub company: String,
}

/// Immutable input record for one support request.
///
/// Emitted once by the upstream producer; consumed logically exactly once by
/// the orchestrator (delivery may be at-least-once, which the deterministic
/// storage key absorbs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketEvent {
    pub ticket_id: String,
    pub submitted_at: DateTime<Utc>,
    pub subject: String,
    pub description: String,
    pub customer: Customer,
    pub product: String,
    pub issue_type: String,
}

impl TicketEvent {
    /// Check the event invariants: all fields non-empty, well-formed id.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !ticket_id_pattern().is_match(&self.ticket_id) {
            return Err(ValidationError::BadTicketId(self.ticket_id.clone()));
        }
        let required: [(&'static str, &str); 9] = [
            ("subject", &self.subject),
            ("description", &self.description),
            ("product", &self.product),
            ("issueType", &self.issue_type),
            ("customer.firstName", &self.customer.first_name),
            ("customer.lastName", &self.customer.last_name),
            ("customer.fullName", &self.customer.full_name),
            ("customer.email", &self.customer.email),
            ("customer.company", &self.customer.company),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyField(name));
            }
        }
        Ok(())
    }

    /// The text handed to sentiment classification.
    pub fn sentiment_input(&self) -> String {
        format!("{}\n\n{}", self.subject, self.description)
    }
}

/// Categorical emotional-tone classification of ticket text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SentimentLabel {
    Positive,
    SlightlyPositive,
    Neutral,
    SlightlyNegative,
    Negative,
    Mixed,
}

impl SentimentLabel {
    /// Negative-leaning labels drive the top rows of the priority table.
    pub fn is_negative_leaning(self) -> bool {
        matches!(self, Self::Negative | Self::SlightlyNegative)
    }

    pub fn is_positive_leaning(self) -> bool {
        matches!(self, Self::Positive | Self::SlightlyPositive)
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Positive => "POSITIVE",
            Self::SlightlyPositive => "SLIGHTLY_POSITIVE",
            Self::Neutral => "NEUTRAL",
            Self::SlightlyNegative => "SLIGHTLY_NEGATIVE",
            Self::Negative => "NEGATIVE",
            Self::Mixed => "MIXED",
        };
        write!(f, "{s}")
    }
}

/// Per-class confidence scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SentimentScores {
    pub mixed: f64,
    pub negative: f64,
    pub neutral: f64,
    pub positive: f64,
}

impl SentimentScores {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields: [(&'static str, f64); 4] = [
            ("mixed", self.mixed),
            ("negative", self.negative),
            ("neutral", self.neutral),
            ("positive", self.positive),
        ];
        for (field, value) in fields {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(ValidationError::ScoreOutOfRange { field, value });
            }
        }
        Ok(())
    }
}

/// Output of the sentiment classification step; attached to the workflow
/// execution and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentAssessment {
    pub label: SentimentLabel,
    pub scores: SentimentScores,
}

/// Priority tier driving the escalation SLA.
///
/// Deliberately three-valued. An earlier schema revision also declared a
/// CRITICAL tier that no classification rule ever assigned; it is omitted
/// here, so a generator emitting it fails structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
    Normal,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Normal => "NORMAL",
        };
        write!(f, "{s}")
    }
}

/// Structured output the generation capability must return.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeneratedResponse {
    /// The first-response text sent to the customer.
    pub customer_response: String,
    /// Priority classification per the decision table.
    pub priority: Priority,
    /// Brief explanation for the priority classification.
    pub priority_reasoning: String,
}

impl GeneratedResponse {
    /// Structural check: all three fields present and non-empty.
    /// (The priority enum is enforced at the serde layer.)
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.customer_response.trim().is_empty() {
            return Err(ValidationError::EmptyField("customer_response"));
        }
        if self.priority_reasoning.trim().is_empty() {
            return Err(ValidationError::EmptyField("priority_reasoning"));
        }
        Ok(())
    }
}

/// Denormalized union of ticket + sentiment + response; the unit of
/// persistence and export. Created exactly once per ticket id on workflow
/// success and never updated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedTicketRecord {
    pub ticket_id: String,
    pub submitted_at: DateTime<Utc>,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub customer_full_name: String,
    pub customer_email: String,
    pub product: String,
    pub issue_type: String,
    pub subject: String,
    pub description: String,
    pub response_text: String,
    pub sentiment: SentimentLabel,
    pub sentiment_score_mixed: f64,
    pub sentiment_score_negative: f64,
    pub sentiment_score_neutral: f64,
    pub sentiment_score_positive: f64,
    pub priority: Priority,
    pub priority_reasoning: String,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedTicketRecord {
    /// Flatten the three step outputs into one record.
    pub fn assemble(
        event: &TicketEvent,
        assessment: &SentimentAssessment,
        response: &GeneratedResponse,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ticket_id: event.ticket_id.clone(),
            submitted_at: event.submitted_at,
            customer_first_name: event.customer.first_name.clone(),
            customer_last_name: event.customer.last_name.clone(),
            customer_full_name: event.customer.full_name.clone(),
            customer_email: event.customer.email.clone(),
            product: event.product.clone(),
            issue_type: event.issue_type.clone(),
            subject: event.subject.clone(),
            description: event.description.clone(),
            response_text: response.customer_response.clone(),
            sentiment: assessment.label,
            sentiment_score_mixed: assessment.scores.mixed,
            sentiment_score_negative: assessment.scores.negative,
            sentiment_score_neutral: assessment.scores.neutral,
            sentiment_score_positive: assessment.scores.positive,
            priority: response.priority,
            priority_reasoning: response.priority_reasoning.clone(),
            processed_at,
        }
    }
}

/// Boolean verdict of the four-criterion quality rubric. Append-only audit
/// output; best-effort and order-independent relative to persistence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityVerdict {
    pub contextual_relevance: bool,
    pub technical_accuracy: bool,
    pub professional_tone: bool,
    pub actionable_guidance: bool,
}

impl QualityVerdict {
    pub fn all_pass(&self) -> bool {
        self.contextual_relevance
            && self.technical_accuracy
            && self.professional_tone
            && self.actionable_guidance
    }

    /// Names of the criteria that failed, for audit logs.
    pub fn failed_criteria(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if !self.contextual_relevance {
            failed.push("contextual_relevance");
        }
        if !self.technical_accuracy {
            failed.push("technical_accuracy");
        }
        if !self.professional_tone {
            failed.push("professional_tone");
        }
        if !self.actionable_guidance {
            failed.push("actionable_guidance");
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_event() -> TicketEvent {
        TicketEvent {
            ticket_id: "TKT-20250812-1042".into(),
            submitted_at: Utc.with_ymd_and_hms(2025, 8, 12, 14, 10, 0).unwrap(),
            subject: "RDS Database completely down - production outage".into(),
            description: "Our production RDS PostgreSQL database is down and unreachable. \
                          We have customer impact right now."
                .into(),
            customer: Customer {
                first_name: "John".into(),
                last_name: "Smith".into(),
                full_name: "John Smith".into(),
                email: "john.smith@example.com".into(),
                company: "Acme Corp".into(),
            },
            product: "RDS".into(),
            issue_type: "connectivity".into(),
        }
    }

    #[test]
    fn valid_event_passes() {
        assert!(sample_event().validate().is_ok());
    }

    #[test]
    fn bad_ticket_id_rejected() {
        let mut event = sample_event();
        event.ticket_id = "TICKET-42".into();
        assert!(matches!(
            event.validate(),
            Err(ValidationError::BadTicketId(_))
        ));
    }

    #[test]
    fn empty_field_rejected() {
        let mut event = sample_event();
        event.customer.email = "  ".into();
        assert_eq!(
            event.validate(),
            Err(ValidationError::EmptyField("customer.email"))
        );
    }

    #[test]
    fn sentiment_label_wire_format() {
        let json = serde_json::to_string(&SentimentLabel::SlightlyNegative).unwrap();
        assert_eq!(json, "\"SLIGHTLY_NEGATIVE\"");
        let back: SentimentLabel = serde_json::from_str("\"MIXED\"").unwrap();
        assert_eq!(back, SentimentLabel::Mixed);
    }

    #[test]
    fn priority_rejects_unknown_tier() {
        // CRITICAL is a dead value from an older schema; it must not parse.
        let err = serde_json::from_str::<Priority>("\"CRITICAL\"");
        assert!(err.is_err());
    }

    #[test]
    fn scores_out_of_range_rejected() {
        let scores = SentimentScores {
            mixed: 0.1,
            negative: 1.2,
            neutral: 0.3,
            positive: 0.0,
        };
        assert!(matches!(
            scores.validate(),
            Err(ValidationError::ScoreOutOfRange {
                field: "negative",
                ..
            })
        ));
    }

    #[test]
    fn generated_response_requires_all_fields() {
        let resp = GeneratedResponse {
            customer_response: "".into(),
            priority: Priority::Normal,
            priority_reasoning: "informational".into(),
        };
        assert_eq!(
            resp.validate(),
            Err(ValidationError::EmptyField("customer_response"))
        );
    }

    #[test]
    fn record_assembly_flattens_scores() {
        let event = sample_event();
        let assessment = SentimentAssessment {
            label: SentimentLabel::Negative,
            scores: SentimentScores {
                mixed: 0.01,
                negative: 0.92,
                neutral: 0.05,
                positive: 0.02,
            },
        };
        let response = GeneratedResponse {
            customer_response: "Hello John Smith, ...".into(),
            priority: Priority::High,
            priority_reasoning: "Production outage with negative sentiment".into(),
        };
        let now = Utc::now();
        let record = ProcessedTicketRecord::assemble(&event, &assessment, &response, now);
        assert_eq!(record.ticket_id, event.ticket_id);
        assert_eq!(record.sentiment, SentimentLabel::Negative);
        assert_eq!(record.sentiment_score_negative, 0.92);
        assert_eq!(record.priority, Priority::High);
        assert_eq!(record.processed_at, now);
    }

    #[test]
    fn verdict_failed_criteria() {
        let verdict = QualityVerdict {
            contextual_relevance: true,
            technical_accuracy: false,
            professional_tone: true,
            actionable_guidance: false,
        };
        assert!(!verdict.all_pass());
        assert_eq!(
            verdict.failed_criteria(),
            vec!["technical_accuracy", "actionable_guidance"]
        );
    }
}
