//! Workflow orchestration: one strictly sequential execution per ticket,
//! unbounded concurrency across tickets.
//!
//! Each step is retried with bounded exponential backoff. When a step
//! exhausts its budget the execution transitions to Failed and exactly one
//! alert is emitted; other in-flight executions are unaffected. Cancellation
//! also drives the execution to Failed, but without an alert and without a
//! partial record (the store writes atomically).

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use policy::{ProcessedTicketRecord, TicketEvent};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::errors::{RetryPolicy, StepError};
use crate::generation::{self, ResponseGenerator};
use crate::notifier::{FailureAlert, FailureNotifier};
use crate::persistence::PersistenceWriter;
use crate::queue::SpoolQueue;
use crate::sentiment::SentimentClassifier;
use crate::state_machine::{StateMachine, TransitionRecord, WorkflowState};

/// Terminal result of one workflow execution.
#[derive(Debug, Clone)]
pub enum OutcomeStatus {
    Completed {
        /// Storage key the record landed at.
        location: String,
    },
    Failed {
        /// State the execution failed in.
        step: String,
        error: String,
    },
    /// Shutdown interrupted the execution. Nothing was persisted and no
    /// alert is owed; the event must stay in the spool for the next run.
    Cancelled {
        /// State the execution was interrupted in.
        step: String,
    },
}

#[derive(Debug, Clone)]
pub struct TicketOutcome {
    pub ticket_id: String,
    pub status: OutcomeStatus,
    /// True when the priority had to be defaulted after repeated policy
    /// rejections; flagged for human review.
    pub policy_flagged: bool,
    pub transitions: Vec<TransitionRecord>,
}

impl TicketOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, OutcomeStatus::Cancelled { .. })
    }
}

type Clock = fn() -> DateTime<Utc>;

pub struct Orchestrator {
    classifier: Arc<dyn SentimentClassifier>,
    generator: Arc<dyn ResponseGenerator>,
    writer: Arc<PersistenceWriter>,
    notifier: Arc<dyn FailureNotifier>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    clock: Clock,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<dyn SentimentClassifier>,
        generator: Arc<dyn ResponseGenerator>,
        writer: Arc<PersistenceWriter>,
        notifier: Arc<dyn FailureNotifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            classifier,
            generator,
            writer,
            notifier,
            retry,
            cancel: CancellationToken::new(),
            clock: Utc::now,
        }
    }

    /// Replace the cancellation token, typically with one wired to SIGINT.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the processing-timestamp source. Production uses `Utc::now`.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Retry `attempt_fn` per the backoff schedule while its error stays
    /// retriable. Returns the last error once the budget is spent.
    async fn retry_step<T, F, Fut>(
        &self,
        ticket_id: &str,
        step: WorkflowState,
        mut attempt_fn: F,
    ) -> Result<T, StepError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let mut last_error = None;
        for attempt in 1..=self.retry.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(StepError::Transient("shutdown requested".into()));
            }
            match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        ticket_id = %ticket_id,
                        step = %step,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "step failed; backing off"
                    );
                    last_error = Some(err);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            return Err(StepError::Transient("shutdown requested".into()));
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error
            .unwrap_or_else(|| StepError::Transient("retry budget was zero".into())))
    }

    /// Mark the execution failed and emit its single alert.
    ///
    /// Cancellation is the one failure that does not alert: nothing is
    /// broken, the operator asked the process to stop. It is also the one
    /// failure that keeps the event in the spool, so a graceful shutdown
    /// is never lossier than a crash.
    async fn fail(&self, sm: &mut StateMachine, ticket_id: &str, err: &StepError) -> OutcomeStatus {
        let step = sm.current().to_string();
        if sm.fail(&err.to_string()).is_err() {
            tracing::error!(ticket_id = %ticket_id, "failure from terminal state");
        }
        if self.cancel.is_cancelled() {
            return OutcomeStatus::Cancelled { step };
        }
        self.notifier
            .notify(&FailureAlert {
                ticket_id: ticket_id.to_string(),
                failed_step: step.clone(),
                error: err.to_string(),
                occurred_at: (self.clock)(),
            })
            .await;
        OutcomeStatus::Failed {
            step,
            error: err.to_string(),
        }
    }

    /// Run one ticket through the full workflow to a terminal state.
    pub async fn process_ticket(&self, event: &TicketEvent) -> TicketOutcome {
        let ticket_id = event.ticket_id.clone();
        let mut sm = StateMachine::new(&ticket_id);
        let mut policy_flagged = false;

        let status = self.run_steps(event, &mut sm, &mut policy_flagged).await;
        let status = match status {
            Ok(location) => OutcomeStatus::Completed { location },
            Err(err) => self.fail(&mut sm, &ticket_id, &err).await,
        };

        tracing::info!(ticket_id = %ticket_id, summary = %sm.summary(), "execution finished");
        TicketOutcome {
            ticket_id,
            status,
            policy_flagged,
            transitions: sm.transitions().to_vec(),
        }
    }

    async fn run_steps(
        &self,
        event: &TicketEvent,
        sm: &mut StateMachine,
        policy_flagged: &mut bool,
    ) -> Result<String, StepError> {
        // Receiving: inbound contract check, no retries.
        event
            .validate()
            .map_err(|e| StepError::Validation(e.to_string()))?;
        sm.advance(WorkflowState::SentimentDetection, Some("event validated"))
            .map_err(|e| StepError::Validation(e.to_string()))?;

        let assessment = {
            let classifier = self.classifier.clone();
            let text = event.sentiment_input();
            self.retry_step(&event.ticket_id, WorkflowState::SentimentDetection, move |_| {
                let classifier = classifier.clone();
                let text = text.clone();
                async move { classifier.classify(&text).await }
            })
            .await?
        };
        sm.advance(
            WorkflowState::ResponseGeneration,
            Some(&format!("label: {}", assessment.label)),
        )
        .map_err(|e| StepError::Validation(e.to_string()))?;

        // Generation owns its retry loop; retries change the prompt.
        let outcome =
            generation::generate_validated(self.generator.as_ref(), event, &assessment, &self.retry)
                .await?;
        *policy_flagged = outcome.policy_flagged;
        sm.advance(
            WorkflowState::Persisting,
            Some(&format!("priority: {}", outcome.response.priority)),
        )
        .map_err(|e| StepError::Validation(e.to_string()))?;

        let record =
            ProcessedTicketRecord::assemble(event, &assessment, &outcome.response, (self.clock)());
        let location = {
            let writer = self.writer.clone();
            let record = record.clone();
            self.retry_step(&event.ticket_id, WorkflowState::Persisting, move |_| {
                let writer = writer.clone();
                let record = record.clone();
                async move { writer.write(&record).await }
            })
            .await?
        };
        sm.advance(WorkflowState::Completed, Some(&location))
            .map_err(|e| StepError::Validation(e.to_string()))?;
        Ok(location)
    }
}

/// Drain the spool, processing every pending ticket concurrently. Spool
/// files are acknowledged only after a terminal outcome; a cancelled
/// execution leaves its file in place to be re-polled on the next run.
/// Returns the outcomes in completion order.
pub async fn run_pipeline(
    orchestrator: Arc<Orchestrator>,
    queue: Arc<SpoolQueue>,
) -> Result<Vec<TicketOutcome>, StepError> {
    let pending = queue.poll().await?;
    tracing::info!(count = pending.len(), "draining spool");

    let mut tasks = JoinSet::new();
    for spooled in pending {
        let orchestrator = orchestrator.clone();
        let queue = queue.clone();
        tasks.spawn(async move {
            let outcome = orchestrator.process_ticket(&spooled.event).await;
            if outcome.is_cancelled() {
                tracing::info!(
                    ticket_id = %outcome.ticket_id,
                    "shutdown interrupted execution; event stays spooled"
                );
            } else if let Err(e) = queue.ack(&spooled.path).await {
                tracing::error!(
                    ticket_id = %outcome.ticket_id,
                    error = %e,
                    "failed to acknowledge spool file"
                );
            }
            outcome
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::error!(error = %e, "execution task panicked"),
        }
    }
    Ok(outcomes)
}
