//! Prompt assembly for the response generation capability.
//!
//! The generator is asked for a strict JSON object matching the
//! `GeneratedResponse` schema. The schema is embedded verbatim in the prompt
//! so drift between code and prompt is impossible.

use policy::{sla_for, GeneratedResponse, Priority, SentimentAssessment, TicketEvent};

pub const SYSTEM_ROLE: &str = "You are a senior support engineer drafting the first \
response to a customer ticket. You write in a calm, professional register: no \
exclamation marks, no emoji, no contractions, no casual filler.";

const TASK: &str = "Given the ticket below and its sentiment assessment, produce:\n\
1. customer_response: a first reply that names the customer's product, restates \
their specific problem, and gives two or three concrete numbered troubleshooting \
steps, each anchored to a console, dashboard, log, metric, CLI, or API action.\n\
2. priority: one of HIGH, MEDIUM, NORMAL.\n\
3. priority_reasoning: one sentence explaining the tier.";

const PRIORITY_GUIDELINES: &str = "Priority policy:\n\
- HIGH (respond within 2-4 hours): negative sentiment combined with \
business-continuity impact such as production outage, unreachable systems, \
revenue loss, security exposure, or cancellation risk; or a \
configuration/performance problem causing explicit productivity loss during \
business hours.\n\
- MEDIUM (respond within 1-2 business days): degraded performance, timeouts, \
configuration trouble, or neutral-toned production issues.\n\
- NORMAL (respond within 2-3 business days): routine questions, positive or \
neutral tickets with no impact signals.\n\
Never assign HIGH to a ticket with positive sentiment and no impact signals.";

/// Build the full generation prompt for one ticket.
pub fn generation_prompt(event: &TicketEvent, assessment: &SentimentAssessment) -> String {
    let schema = schemars::schema_for!(GeneratedResponse);
    let schema_json =
        serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());

    format!(
        "{TASK}\n\n{PRIORITY_GUIDELINES}\n\n\
        Ticket {id} from {name} ({company}), product: {product}, category: {issue_type}\n\
        Subject: {subject}\n\
        Description: {description}\n\n\
        Sentiment: {label} (negative score {neg:.2}, positive score {pos:.2})\n\n\
        Respond with ONLY a JSON object matching this schema, no prose before or \
        after:\n```json\n{schema_json}\n```",
        id = event.ticket_id,
        name = event.customer.full_name,
        company = event.customer.company,
        product = event.product,
        issue_type = event.issue_type,
        subject = event.subject,
        description = event.description,
        label = assessment.label,
        neg = assessment.scores.negative,
        pos = assessment.scores.positive,
    )
}

/// Corrective addendum appended when a previous attempt failed validation.
pub fn corrective_feedback(failure: &str) -> String {
    format!(
        "\n\nYour previous answer was rejected: {failure}\n\
        Produce a corrected JSON object that addresses this exactly. \
        Remember the allowed priority values are HIGH, MEDIUM, NORMAL and the \
        matching response windows are {high}, {medium}, {normal}.",
        high = sla_for(Priority::High),
        medium = sla_for(Priority::Medium),
        normal = sla_for(Priority::Normal),
    )
}
