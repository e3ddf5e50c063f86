//! Deterministic core of the ticket triage pipeline.
//!
//! This crate holds everything that must behave identically across runs and
//! can be tested without I/O:
//! - the data model shared by producer, workflow, and export (`model`)
//! - the priority classification policy and its validator (`priority`)
//! - the four-criterion response quality rubric (`rubric`)
//! - the warehouse export schema and null-value data-quality gate (`warehouse`)
//!
//! The runtime crate (`triage-agents`) wires these into the orchestration
//! loop; nothing here performs network or filesystem access.

pub mod model;
pub mod priority;
pub mod rubric;
pub mod warehouse;

pub use model::{
    Customer, GeneratedResponse, Priority, ProcessedTicketRecord, QualityVerdict,
    SentimentAssessment, SentimentLabel, SentimentScores, TicketEvent,
};
pub use priority::{
    classify, extract_signals, sla_for, validate_priority, ImpactClass, ImpactSignals,
    PolicyViolation, PriorityDecision,
};
pub use rubric::evaluate;
