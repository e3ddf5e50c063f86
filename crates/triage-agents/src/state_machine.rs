//! Workflow state machine — explicit states and legal transition guards.
//!
//! Each ticket gets its own state machine so that:
//! 1. Every transition is auditable and logged.
//! 2. Illegal transitions are caught by the `advance()` guard.
//! 3. The transition log reconstructs exactly what happened to a ticket.
//!
//! Steps execute strictly sequentially; retries happen inside a step and do
//! not produce transitions. The machine is discarded after a terminal
//! outcome — the persisted record or the alert is the durable trace.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of workflow states.
///
/// Every execution starts at `Receiving` and terminates at either
/// `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Validating the inbound ticket event.
    Receiving,
    /// Calling the sentiment classification capability.
    SentimentDetection,
    /// Calling the response generation capability and validating its output.
    ResponseGeneration,
    /// Durably storing the processed record.
    Persisting,
    /// Record stored — terminal state.
    Completed,
    /// Retries exhausted — terminal state; triggers exactly one alert.
    Failed,
}

impl WorkflowState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receiving => write!(f, "Receiving"),
            Self::SentimentDetection => write!(f, "SentimentDetection"),
            Self::ResponseGeneration => write!(f, "ResponseGeneration"),
            Self::Persisting => write!(f, "Persisting"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Legal transitions between workflow states.
///
/// ```text
/// Receiving → SentimentDetection | Failed
/// SentimentDetection → ResponseGeneration | Failed
/// ResponseGeneration → Persisting | Failed
/// Persisting → Completed | Failed
/// ```
fn is_legal_transition(from: WorkflowState, to: WorkflowState) -> bool {
    use WorkflowState::*;

    // Any non-terminal state can transition to Failed.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Receiving, SentimentDetection)
            | (SentimentDetection, ResponseGeneration)
            | (ResponseGeneration, Persisting)
            | (Persisting, Completed)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    /// Optional context about why this transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal state transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Per-ticket workflow state machine.
///
/// Tracks the current state, enforces legal transitions, and keeps a
/// complete transition log for diagnostics.
pub struct StateMachine {
    ticket_id: String,
    current: WorkflowState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine for one ticket, starting at `Receiving`.
    pub fn new(ticket_id: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            current: WorkflowState::Receiving,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> WorkflowState {
        self.current
    }

    /// Attempt to advance to the next state.
    pub fn advance(
        &mut self,
        to: WorkflowState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            ticket_id = %self.ticket_id,
            from = %self.current,
            to = %to,
            "state transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` from any non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(WorkflowState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line summary of the execution's history.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}: {} -> {} ({}ms)",
            self.ticket_id,
            WorkflowState::Receiving,
            self.current,
            self.created_at.elapsed().as_millis(),
        );
        if !self.transitions.is_empty() {
            let states: Vec<String> =
                self.transitions.iter().map(|t| t.to.to_string()).collect();
            line.push_str(&format!(" [{}]", states.join(" -> ")));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_receiving() {
        let sm = StateMachine::new("TKT-20250812-1042");
        assert_eq!(sm.current(), WorkflowState::Receiving);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn happy_path_transitions() {
        let mut sm = StateMachine::new("TKT-20250812-1042");
        sm.advance(WorkflowState::SentimentDetection, None).unwrap();
        sm.advance(WorkflowState::ResponseGeneration, Some("label: NEGATIVE"))
            .unwrap();
        sm.advance(WorkflowState::Persisting, None).unwrap();
        sm.advance(WorkflowState::Completed, Some("record stored"))
            .unwrap();

        assert!(sm.is_terminal());
        assert_eq!(sm.current(), WorkflowState::Completed);
        assert_eq!(sm.transitions().len(), 4);
    }

    #[test]
    fn failure_reachable_from_any_non_terminal_state() {
        let cases: [(WorkflowState, &[WorkflowState]); 4] = [
            (WorkflowState::Receiving, &[][..]),
            (
                WorkflowState::SentimentDetection,
                &[WorkflowState::SentimentDetection][..],
            ),
            (
                WorkflowState::ResponseGeneration,
                &[
                    WorkflowState::SentimentDetection,
                    WorkflowState::ResponseGeneration,
                ][..],
            ),
            (
                WorkflowState::Persisting,
                &[
                    WorkflowState::SentimentDetection,
                    WorkflowState::ResponseGeneration,
                    WorkflowState::Persisting,
                ][..],
            ),
        ];
        for (state, setup) in cases {
            let mut sm = StateMachine::new("TKT-20250812-0001");
            for step in setup {
                sm.advance(*step, None).unwrap();
            }
            assert_eq!(sm.current(), state);
            sm.fail("retries exhausted").unwrap();
            assert_eq!(sm.current(), WorkflowState::Failed);
            assert!(sm.is_terminal());
        }
    }

    #[test]
    fn cannot_transition_from_terminal() {
        let mut sm = StateMachine::new("TKT-20250812-0001");
        sm.fail("bad event").unwrap();

        let err = sm
            .advance(WorkflowState::SentimentDetection, None)
            .unwrap_err();
        assert_eq!(err.from, WorkflowState::Failed);
        assert!(sm.fail("again").is_err());
    }

    #[test]
    fn cannot_skip_steps() {
        let mut sm = StateMachine::new("TKT-20250812-0001");
        let err = sm.advance(WorkflowState::Persisting, None).unwrap_err();
        assert_eq!(err.from, WorkflowState::Receiving);
        assert_eq!(err.to, WorkflowState::Persisting);
    }

    #[test]
    fn cannot_go_backward() {
        let mut sm = StateMachine::new("TKT-20250812-0001");
        sm.advance(WorkflowState::SentimentDetection, None).unwrap();
        sm.advance(WorkflowState::ResponseGeneration, None).unwrap();
        assert!(sm
            .advance(WorkflowState::SentimentDetection, None)
            .is_err());
    }

    #[test]
    fn transition_record_carries_reason() {
        let mut sm = StateMachine::new("TKT-20250812-0001");
        sm.advance(WorkflowState::SentimentDetection, Some("event validated"))
            .unwrap();
        let record = &sm.transitions()[0];
        assert_eq!(record.from, WorkflowState::Receiving);
        assert_eq!(record.reason.as_deref(), Some("event validated"));
    }

    #[test]
    fn transition_record_serde_roundtrip() {
        let record = TransitionRecord {
            from: WorkflowState::Persisting,
            to: WorkflowState::Failed,
            elapsed_ms: 1234,
            reason: Some("storage write failed".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.from, WorkflowState::Persisting);
        assert_eq!(restored.to, WorkflowState::Failed);
        assert_eq!(restored.elapsed_ms, 1234);
    }

    #[test]
    fn summary_names_terminal_state() {
        let mut sm = StateMachine::new("TKT-20250812-0001");
        sm.advance(WorkflowState::SentimentDetection, None).unwrap();
        sm.fail("classifier unreachable").unwrap();
        let summary = sm.summary();
        assert!(summary.contains("Failed"));
        assert!(summary.contains("TKT-20250812-0001"));
    }
}
