//! Response quality rubric: four boolean acceptance criteria applied to a
//! generated first response, graded conservatively.
//!
//! Every criterion defaults to false and flips to true only on explicit,
//! unambiguous evidence in the response text. No benefit of the doubt:
//! missing details, vague references, or generic statements fail the
//! criterion. The rubric is pure and side-effect-free; it runs out-of-band
//! against already-persisted records.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::{QualityVerdict, KNOWN_PRODUCTS};

/// Contractions and casual phrasing that fail `professional_tone`.
const CASUAL_PHRASES: &[&str] = &[
    "hey", "gonna", "wanna", "gotta", "kinda", "sorta", "yeah", "nope", "cool", "awesome", "btw",
    "thx", "lol", "asap",
];

fn contraction_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Apostrophe forms: don't, can't, we're, it's, you'll, we've, I'd, I'm
    RE.get_or_init(|| Regex::new(r"(?i)\b[a-z]+'(t|s|re|ll|ve|d|m)\b").expect("contraction"))
}

fn casual_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = CASUAL_PHRASES.join("|");
        Regex::new(&format!(r"(?i)\b({alternation})\b")).expect("casual")
    })
}

fn numbered_step_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*\d+[.)]\s+(.+)$").expect("steps"))
}

/// A step counts as executable only when tied to a concrete feature, log,
/// console path, metric, or command.
fn step_anchor_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(console|dashboard|\blogs?\b|metrics?|alarms?|\bcli\b|\bapi\b|`[^`]+`)")
            .expect("anchor")
    })
}

fn has_emoji(text: &str) -> bool {
    text.chars().any(|c| {
        let cp = c as u32;
        // Common emoji blocks: emoticons, pictographs, transport, supplemental.
        (0x1F300..=0x1FAFF).contains(&cp) || (0x2600..=0x27BF).contains(&cp)
    })
}

/// `professional_tone`: no contractions, slang, emojis, exclamation marks,
/// or casual phrasing anywhere in the text.
fn professional_tone(response: &str) -> bool {
    if response.trim().is_empty() {
        return false;
    }
    if response.contains('!') || has_emoji(response) {
        return false;
    }
    if contraction_pattern().is_match(response) {
        return false;
    }
    !casual_pattern().is_match(response)
}

/// Significant terms from ticket text: lowercase words of 4+ characters,
/// minus filler that appears in any support ticket.
fn significant_terms(text: &str) -> Vec<String> {
    const FILLER: &[&str] = &[
        "with", "this", "that", "have", "after", "from", "about", "been", "when", "your", "them",
        "they", "were", "will", "would", "could", "should", "please", "right", "since",
    ];
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= 4 && !FILLER.contains(&w.as_str()))
        .collect()
}

/// `contextual_relevance`: the response names the exact product from the
/// ticket and restates the same problem (shares at least two significant
/// terms with the subject).
fn contextual_relevance(subject: &str, product: &str, response: &str) -> bool {
    if product.trim().is_empty() {
        return false;
    }
    let response_lower = response.to_lowercase();
    if !response_lower.contains(&product.to_lowercase()) {
        return false;
    }
    let subject_terms = significant_terms(subject);
    let shared = subject_terms
        .iter()
        .filter(|t| response_lower.contains(t.as_str()))
        .count();
    shared >= 2
}

/// `technical_accuracy`: every technical detail must be applicable to the
/// reported issue. A single stray reference to an unrelated product forces
/// false, as does the absence of any concrete technical detail.
fn technical_accuracy(product: &str, response: &str) -> bool {
    let response_lower = response.to_lowercase();
    if !response_lower.contains(&product.to_lowercase()) {
        return false;
    }
    if !step_anchor_pattern().is_match(response) {
        // No console path, log, metric, or command reference at all.
        return false;
    }
    // Any mention of a known product other than the ticket's is an
    // irrelevant detail.
    for other in KNOWN_PRODUCTS {
        if other.eq_ignore_ascii_case(product) {
            continue;
        }
        if response_lower.contains(&other.to_lowercase()) {
            return false;
        }
    }
    true
}

/// `actionable_guidance`: 2-3 numbered steps, each anchored to a concrete
/// feature, log, console path, or command. One step, or vague steps like
/// "check your settings", force false.
fn actionable_guidance(response: &str) -> bool {
    let steps: Vec<&str> = numbered_step_pattern()
        .captures_iter(response)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if !(2..=3).contains(&steps.len()) {
        return false;
    }
    steps.iter().all(|step| step_anchor_pattern().is_match(step))
}

/// The product a ticket is about, detected from its subject or description.
fn detect_product(subject: &str, description: &str) -> Option<&'static str> {
    let subject_lower = subject.to_lowercase();
    let description_lower = description.to_lowercase();
    KNOWN_PRODUCTS
        .iter()
        .find(|p| subject_lower.contains(&p.to_lowercase()))
        .or_else(|| {
            KNOWN_PRODUCTS
                .iter()
                .find(|p| description_lower.contains(&p.to_lowercase()))
        })
        .copied()
}

/// Apply the four-criterion rubric to a response.
///
/// When no known product can be identified in the ticket text, the
/// product-dependent criteria stay at their false default.
pub fn evaluate(subject: &str, description: &str, response: &str) -> QualityVerdict {
    let product = detect_product(subject, description);
    QualityVerdict {
        contextual_relevance: product
            .map(|p| contextual_relevance(subject, p, response))
            .unwrap_or(false),
        technical_accuracy: product
            .map(|p| technical_accuracy(p, response))
            .unwrap_or(false),
        professional_tone: professional_tone(response),
        actionable_guidance: actionable_guidance(response),
    }
}
