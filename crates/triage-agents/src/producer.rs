//! Synthetic ticket producer.
//!
//! Generates realistic ticket events for load and pipeline testing and
//! spools them for the orchestrator. Sentiment is drawn from a weighted
//! distribution skewed toward unhappy customers (people rarely open tickets
//! to say everything works), and the wording of each ticket is aligned with
//! the drawn sentiment so the downstream classifier and priority policy see
//! plausible text.

use std::sync::OnceLock;

use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use policy::{Customer, SentimentLabel, TicketEvent};
use rand::distributions::WeightedIndex;
use rand::prelude::*;

use crate::queue::SpoolQueue;

/// Draw weights per sentiment. Mixed is never produced directly; it is a
/// classifier outcome, not an authoring intent.
pub const SENTIMENT_WEIGHTS: &[(SentimentLabel, f64)] = &[
    (SentimentLabel::Negative, 0.22),
    (SentimentLabel::SlightlyNegative, 0.28),
    (SentimentLabel::Neutral, 0.30),
    (SentimentLabel::SlightlyPositive, 0.12),
    (SentimentLabel::Positive, 0.08),
];

struct Scenario {
    product: &'static str,
    issue_type: &'static str,
    topic: &'static str,
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        product: "RDS",
        issue_type: "availability",
        topic: "database connections",
    },
    Scenario {
        product: "EC2",
        issue_type: "availability",
        topic: "instance health checks",
    },
    Scenario {
        product: "Lambda",
        issue_type: "performance",
        topic: "function invocations",
    },
    Scenario {
        product: "S3",
        issue_type: "configuration",
        topic: "bucket lifecycle rules",
    },
    Scenario {
        product: "DynamoDB",
        issue_type: "performance",
        topic: "table read capacity",
    },
    Scenario {
        product: "CloudFront",
        issue_type: "configuration",
        topic: "cache invalidations",
    },
    Scenario {
        product: "EKS",
        issue_type: "availability",
        topic: "node group scaling",
    },
    Scenario {
        product: "API Gateway",
        issue_type: "performance",
        topic: "request latency",
    },
];

const CUSTOMERS: &[(&str, &str, &str)] = &[
    ("Dana", "Reyes", "Acme Logistics"),
    ("Marcus", "Webb", "Northwind Retail"),
    ("Priya", "Nair", "Helios Analytics"),
    ("Tomas", "Lindqvist", "Fjord Media"),
    ("Aisha", "Diallo", "Brightline Health"),
    ("Kenji", "Mori", "Sakura Fintech"),
];

/// Ticket id in the canonical `TKT-YYYYMMDD-NNNN` shape.
pub fn generate_ticket_id(rng: &mut impl Rng, date: DateTime<Utc>) -> String {
    format!(
        "TKT-{}{:02}{:02}-{:04}",
        date.year(),
        date.month(),
        date.day(),
        rng.gen_range(1000..=9999)
    )
}

fn sentiment_index() -> &'static WeightedIndex<f64> {
    static INDEX: OnceLock<WeightedIndex<f64>> = OnceLock::new();
    INDEX.get_or_init(|| {
        WeightedIndex::new(SENTIMENT_WEIGHTS.iter().map(|(_, w)| *w))
            .expect("static weights are valid")
    })
}

fn draw_sentiment(rng: &mut impl Rng) -> SentimentLabel {
    SENTIMENT_WEIGHTS[sentiment_index().sample(rng)].0
}

fn compose(sentiment: SentimentLabel, scenario: &Scenario) -> (String, String) {
    let (subject, description) = match sentiment {
        SentimentLabel::Negative => (
            format!(
                "{} completely down - production outage with {}",
                scenario.product, scenario.topic
            ),
            format!(
                "Our production {product} workload is completely down and the system is \
                 unreachable. This outage is costing us revenue every minute and we are \
                 considering cancellation if it is not resolved urgently. The {topic} stopped \
                 working about an hour ago.",
                product = scenario.product,
                topic = scenario.topic,
            ),
        ),
        SentimentLabel::SlightlyNegative => (
            format!(
                "{} degraded performance with {}",
                scenario.product, scenario.topic
            ),
            format!(
                "Since yesterday our {product} {topic} have been slow and occasionally \
                 timing out. Requests are being throttled during business hours and it is \
                 blocking our team from finishing the rollout.",
                product = scenario.product,
                topic = scenario.topic,
            ),
        ),
        SentimentLabel::Neutral => (
            format!(
                "Question about {} {}",
                scenario.product, scenario.topic
            ),
            format!(
                "We are planning a change to our {product} setup and would like to \
                 understand how {topic} behave under the new configuration. Could you \
                 point us at the relevant documentation?",
                product = scenario.product,
                topic = scenario.topic,
            ),
        ),
        SentimentLabel::SlightlyPositive | SentimentLabel::Positive | SentimentLabel::Mixed => (
            format!(
                "Feedback on {} {}",
                scenario.product, scenario.topic
            ),
            format!(
                "The recent improvements to {product} have worked well for us and the \
                 {topic} are behaving exactly as documented. One small question about \
                 tuning remains.",
                product = scenario.product,
                topic = scenario.topic,
            ),
        ),
    };
    (subject, description)
}

/// Generate one synthetic ticket event.
pub fn generate_event(rng: &mut impl Rng, now: DateTime<Utc>) -> TicketEvent {
    let sentiment = draw_sentiment(rng);
    let scenario = SCENARIOS.choose(rng).expect("scenario table is non-empty");
    let (first, last, company) = *CUSTOMERS.choose(rng).expect("customer table is non-empty");
    let (subject, description) = compose(sentiment, scenario);

    TicketEvent {
        ticket_id: generate_ticket_id(rng, now),
        submitted_at: now,
        subject,
        description,
        customer: Customer {
            first_name: first.into(),
            last_name: last.into(),
            full_name: format!("{first} {last}"),
            email: format!(
                "{}.{}@{}.example.com",
                first.to_lowercase(),
                last.to_lowercase(),
                company.to_lowercase().replace(' ', "-"),
            ),
            company: company.into(),
        },
        product: scenario.product.into(),
        issue_type: scenario.issue_type.into(),
    }
}

/// Spool `count` synthetic tickets; returns how many were enqueued.
pub async fn run_producer(queue: &SpoolQueue, count: usize) -> Result<usize> {
    let mut rng = rand::thread_rng();
    let mut enqueued = 0;
    for _ in 0..count {
        let event = generate_event(&mut rng, Utc::now());
        queue.enqueue(&event).await?;
        tracing::debug!(ticket_id = %event.ticket_id, subject = %event.subject, "spooled");
        enqueued += 1;
    }
    tracing::info!(count = enqueued, "producer run finished");
    Ok(enqueued)
}
