//! Priority classification policy: impact-signal extraction and the pure
//! decision table combining sentiment with technical impact.
//!
//! The decision table is the hard contract the generation step must satisfy;
//! the generated priority is validated against it, never merely trusted.
//! Rows are evaluated in precedence order and the first match wins:
//!
//! ```text
//! negative  + business-continuity impact          → HIGH    (2-4 hours)
//! negative  + config/performance impact only      → MEDIUM, or HIGH when an
//!                                                   explicit productivity-loss
//!                                                   phrase is present
//! neutral   + business-continuity impact          → MEDIUM  (1-2 business days)
//! mixed     + any technical impact                → MEDIUM  (1-2 business days)
//! positive  + severe impact                       → MEDIUM; otherwise NORMAL
//! no impact signals                               → NORMAL  (2-3 business days)
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Priority, SentimentLabel};

/// Escalation SLA attached to a HIGH classification.
pub const SLA_HIGH: &str = "2-4 hours";
/// Escalation SLA attached to a MEDIUM classification.
pub const SLA_MEDIUM: &str = "1-2 business days";
/// Escalation SLA attached to a NORMAL classification.
pub const SLA_NORMAL: &str = "2-3 business days";

/// Severity class of a technical impact cue found in ticket text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactClass {
    /// Production outage, revenue loss, security incident, cancellation
    /// threat — anything endangering business continuity.
    BusinessContinuity,
    /// Configuration or performance trouble without a continuity threat.
    ConfigPerformance,
}

impl fmt::Display for ImpactClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusinessContinuity => write!(f, "business_continuity"),
            Self::ConfigPerformance => write!(f, "config_performance"),
        }
    }
}

/// One matched impact cue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactSignal {
    pub cue: String,
    pub class: ImpactClass,
}

/// All impact cues extracted from a ticket's text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImpactSignals {
    pub signals: Vec<ImpactSignal>,
    /// An explicit business-hours productivity-loss phrase was present.
    /// This is the documented tie-break that upgrades a negative-sentiment
    /// configuration issue from MEDIUM to HIGH.
    pub productivity_loss: bool,
}

impl ImpactSignals {
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn has_class(&self, class: ImpactClass) -> bool {
        self.signals.iter().any(|s| s.class == class)
    }

    fn cues(&self) -> Vec<&str> {
        self.signals.iter().map(|s| s.cue.as_str()).collect()
    }
}

const BUSINESS_CONTINUITY_CUES: &[&str] = &[
    "production",
    "outage",
    "completely down",
    "unreachable",
    "unavailable",
    "revenue",
    "financial loss",
    "security",
    "breach",
    "data loss",
    "cancel our contract",
    "cancellation",
    "customer impact",
    "customer-facing",
];

const CONFIG_PERFORMANCE_CUES: &[&str] = &[
    "timeout",
    "timing out",
    "degraded",
    "slow",
    "latency",
    "performance",
    "configuration",
    "misconfigur",
    "error rate",
    "throttl",
];

const PRODUCTIVITY_LOSS_CUES: &[&str] = &[
    "cannot work",
    "can not work",
    "unable to work",
    "team is blocked",
    "blocking our team",
    "blocking the team",
    "productivity",
    "business hours",
];

fn cue_pattern(cues: &[&str]) -> Regex {
    let alternation = cues
        .iter()
        .map(|c| regex::escape(c))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)({alternation})")).expect("cue pattern")
}

fn business_continuity_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| cue_pattern(BUSINESS_CONTINUITY_CUES))
}

fn config_performance_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| cue_pattern(CONFIG_PERFORMANCE_CUES))
}

fn productivity_loss_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| cue_pattern(PRODUCTIVITY_LOSS_CUES))
}

/// Extract technical impact cues from ticket text (subject + description).
///
/// The policy is agnostic to how signals are obtained; this keyword extractor
/// is one conforming implementation. Each distinct cue is reported once.
pub fn extract_signals(text: &str) -> ImpactSignals {
    let mut signals = Vec::new();

    for m in business_continuity_pattern().find_iter(text) {
        let cue = m.as_str().to_lowercase();
        if !signals
            .iter()
            .any(|s: &ImpactSignal| s.cue == cue && s.class == ImpactClass::BusinessContinuity)
        {
            signals.push(ImpactSignal {
                cue,
                class: ImpactClass::BusinessContinuity,
            });
        }
    }

    for m in config_performance_pattern().find_iter(text) {
        let cue = m.as_str().to_lowercase();
        if !signals
            .iter()
            .any(|s: &ImpactSignal| s.cue == cue && s.class == ImpactClass::ConfigPerformance)
        {
            signals.push(ImpactSignal {
                cue,
                class: ImpactClass::ConfigPerformance,
            });
        }
    }

    ImpactSignals {
        productivity_loss: productivity_loss_pattern().is_match(text),
        signals,
    }
}

/// Outcome of the decision table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorityDecision {
    pub priority: Priority,
    pub sla: &'static str,
    pub rationale: String,
}

/// The pure decision function. First matching row wins; deterministic for a
/// given (sentiment, signals) pair.
pub fn classify(sentiment: SentimentLabel, signals: &ImpactSignals) -> PriorityDecision {
    use Priority::*;

    if sentiment.is_negative_leaning() && signals.has_class(ImpactClass::BusinessContinuity) {
        return PriorityDecision {
            priority: High,
            sla: SLA_HIGH,
            rationale: format!(
                "negative sentiment with business-continuity impact ({})",
                signals.cues().join(", ")
            ),
        };
    }

    if sentiment.is_negative_leaning() && signals.has_class(ImpactClass::ConfigPerformance) {
        // Tie-break: default MEDIUM unless productivity loss is explicit.
        return if signals.productivity_loss {
            PriorityDecision {
                priority: High,
                sla: SLA_HIGH,
                rationale: "negative sentiment with configuration/performance impact and \
                            explicit business-hours productivity loss"
                    .into(),
            }
        } else {
            PriorityDecision {
                priority: Medium,
                sla: SLA_MEDIUM,
                rationale: "negative sentiment with configuration/performance impact only".into(),
            }
        };
    }

    if sentiment == SentimentLabel::Neutral && signals.has_class(ImpactClass::BusinessContinuity) {
        return PriorityDecision {
            priority: Medium,
            sla: SLA_MEDIUM,
            rationale: "neutral sentiment with production impact".into(),
        };
    }

    if sentiment == SentimentLabel::Mixed && !signals.is_empty() {
        return PriorityDecision {
            priority: Medium,
            sla: SLA_MEDIUM,
            rationale: "mixed sentiment with a technical problem".into(),
        };
    }

    if sentiment.is_positive_leaning() {
        // Positive tickets stay NORMAL unless the impact is severe.
        return if signals.has_class(ImpactClass::BusinessContinuity) {
            PriorityDecision {
                priority: Medium,
                sla: SLA_MEDIUM,
                rationale: "positive sentiment but severe impact signals present".into(),
            }
        } else {
            PriorityDecision {
                priority: Normal,
                sla: SLA_NORMAL,
                rationale: "positive sentiment; routine follow-up".into(),
            }
        };
    }

    if signals.is_empty() {
        return PriorityDecision {
            priority: Normal,
            sla: SLA_NORMAL,
            rationale: "no impact signals detected; informational request".into(),
        };
    }

    // Remaining case: neutral sentiment with configuration/performance
    // signals only. Standard troubleshooting need.
    PriorityDecision {
        priority: Medium,
        sla: SLA_MEDIUM,
        rationale: "neutral sentiment with configuration/performance impact".into(),
    }
}

/// A generated priority claim that the decision table rejects.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PolicyViolation {
    #[error(
        "HIGH priority asserted without any impact signal or negative/mixed sentiment \
         (sentiment: {sentiment})"
    )]
    UnjustifiedHigh { sentiment: SentimentLabel },
}

/// Validate a claimed priority against sentiment and extracted signals.
///
/// The one hard rejection rule: HIGH is only acceptable when there is at
/// least one impact signal or the sentiment is negative/mixed. Everything
/// else is a judgment call left to the generation capability.
pub fn validate_priority(
    claimed: Priority,
    sentiment: SentimentLabel,
    signals: &ImpactSignals,
) -> Result<(), PolicyViolation> {
    if claimed == Priority::High
        && signals.is_empty()
        && !sentiment.is_negative_leaning()
        && sentiment != SentimentLabel::Mixed
    {
        return Err(PolicyViolation::UnjustifiedHigh { sentiment });
    }
    Ok(())
}

/// SLA string for a given priority tier.
pub fn sla_for(priority: Priority) -> &'static str {
    match priority {
        Priority::High => SLA_HIGH,
        Priority::Medium => SLA_MEDIUM,
        Priority::Normal => SLA_NORMAL,
    }
}
