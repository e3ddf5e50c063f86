//! Runtime for the ticket triage pipeline.
//!
//! A ticket event flows through a fixed, strictly sequential workflow:
//! sentiment classification → response generation (validated against the
//! priority policy) → idempotent persistence, with exactly one failure alert
//! when a step exhausts its retry budget. Executions for different tickets
//! are fully independent and run concurrently.
//!
//! Out-of-band collaborators share the same persisted records: the warehouse
//! export job (`export`), the quality audit runner (`audit`), and the
//! synthetic ticket producer (`producer`).

pub mod audit;
pub mod config;
pub mod errors;
pub mod export;
pub mod generation;
pub mod notifier;
pub mod orchestrator;
pub mod persistence;
pub mod producer;
pub mod prompts;
pub mod queue;
pub mod sentiment;
pub mod state_machine;
