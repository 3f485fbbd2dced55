//! Queue transition table
//!
//! Pure functions mapping a queue state and the result of one submission
//! attempt to the next state. The processor persists whatever these return;
//! nothing here touches storage or the clock.
//!
//! ```text
//! IDLE ──queue──▶ PROCESSING ──success──▶ COMPLETED (queue empty)
//!                    ▲   │      └───────▶ PROCESSING (more queued)
//!                    │   ├──retry───────▶ WAITING_CONFIRMATION
//!                    │   │                    │
//!                    └───┼────next attempt────┘
//!                        └──failed──────▶ ERROR (queue empty) / PROCESSING
//! ```

use crate::core::traits::SubmissionOutcome;
use crate::types::{QueueState, QueueStatus, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one `process_next` step, as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessOutcome {
    Success,
    Retry,
    Failed,
}

impl From<SubmissionOutcome> for ProcessOutcome {
    fn from(outcome: SubmissionOutcome) -> Self {
        match outcome {
            SubmissionOutcome::Success => ProcessOutcome::Success,
            SubmissionOutcome::Retry => ProcessOutcome::Retry,
            SubmissionOutcome::Failed => ProcessOutcome::Failed,
        }
    }
}

/// Apply a channel outcome for the head record
///
/// - `Success` drops the head; `COMPLETED` if nothing is left, else
///   `PROCESSING`.
/// - `Retry` bumps the head's attempt counter, stamps it, and moves it to the
///   tail; `WAITING_CONFIRMATION`.
/// - `Failed` moves the head to the failed list; `ERROR` if nothing is left,
///   else `PROCESSING`.
///
/// An empty queue is returned unchanged with `Success`.
pub fn apply(
    mut state: QueueState,
    outcome: SubmissionOutcome,
    now: DateTime<Utc>,
) -> (QueueState, ProcessOutcome) {
    if state.queue.is_empty() {
        return (state, ProcessOutcome::Success);
    }
    let mut head = state.queue.remove(0);

    match outcome {
        SubmissionOutcome::Success => {
            state.status = if state.queue.is_empty() {
                QueueStatus::Completed
            } else {
                QueueStatus::Processing
            };
        }
        SubmissionOutcome::Retry => {
            head.processing_attempts += 1;
            head.last_attempt_timestamp = Some(now);
            state.queue.push(head);
            state.status = QueueStatus::WaitingConfirmation;
        }
        SubmissionOutcome::Failed => {
            state.failed_transactions.push(head);
            state.status = after_failure(&state);
        }
    }

    (state, outcome.into())
}

/// Route a head record that has used up its attempts to the failed list
pub fn exhaust(mut state: QueueState) -> (QueueState, ProcessOutcome) {
    if state.queue.is_empty() {
        return (state, ProcessOutcome::Success);
    }
    let head = state.queue.remove(0);
    state.failed_transactions.push(head);
    state.status = after_failure(&state);
    (state, ProcessOutcome::Failed)
}

/// The channel could not report any outcome for the head record
///
/// The head stays where it is with one more attempt counted, so repeated
/// faults still run into the attempt limit. Status becomes `ERROR`.
pub fn fault(mut state: QueueState, now: DateTime<Utc>) -> (QueueState, ProcessOutcome) {
    if let Some(head) = state.queue.first_mut() {
        head.processing_attempts += 1;
        head.last_attempt_timestamp = Some(now);
    }
    state.status = QueueStatus::Error;
    (state, ProcessOutcome::Failed)
}

/// A queued record was reported as not submitted by the page side
///
/// Counts as a retry for that record, wherever it sits in the queue: one
/// more attempt, moved to the tail. Once `max_attempts` is reached it goes
/// to the failed list instead. Returns `None` if `id` is not queued.
pub fn reject(
    mut state: QueueState,
    id: TransactionId,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Option<(QueueState, ProcessOutcome)> {
    let index = state.queue.iter().position(|r| r.id == id)?;
    let mut record = state.queue.remove(index);
    record.processing_attempts += 1;
    record.last_attempt_timestamp = Some(now);

    if record.processing_attempts >= max_attempts {
        state.failed_transactions.push(record);
        state.status = after_failure(&state);
        Some((state, ProcessOutcome::Failed))
    } else {
        state.queue.push(record);
        state.status = QueueStatus::WaitingConfirmation;
        Some((state, ProcessOutcome::Retry))
    }
}

fn after_failure(state: &QueueState) -> QueueStatus {
    if state.queue.is_empty() {
        QueueStatus::Error
    } else {
        QueueStatus::Processing
    }
}
