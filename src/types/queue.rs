//! Queue-related types for the tax import engine
//!
//! This module defines the persisted queue state, the partial-update patch used
//! to mutate it, the processing lock token, and the page-side in-flight flags
//! that make crash recovery possible.

use super::transaction::{TransactionId, TransactionRecord};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    /// Nothing queued, or the last drain finished
    #[default]
    Idle,

    /// Records are being submitted
    Processing,

    /// The head record asked to be retried later
    WaitingConfirmation,

    /// The last record was submitted successfully
    Completed,

    /// A record failed permanently or processing hit an internal error
    Error,
}

/// Persisted queue state singleton
///
/// `queue` is FIFO (head = next record to submit) and never contains two
/// records with the same fingerprint; `failed_transactions` collects records
/// that exhausted their retries, in the order they failed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    #[serde(default)]
    pub status: QueueStatus,

    #[serde(default)]
    pub queue: Vec<TransactionRecord>,

    #[serde(default)]
    pub failed_transactions: Vec<TransactionRecord>,
}

impl QueueState {
    /// Summary suitable for status reporting
    pub fn summary(&self, in_flight: Option<TransactionId>) -> QueueSummary {
        QueueSummary {
            status: self.status,
            queued: self.queue.len(),
            failed: self.failed_transactions.len(),
            in_flight,
        }
    }
}

/// Partial update of [`QueueState`]
///
/// Fields left as `None` keep their persisted value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub status: Option<QueueStatus>,
    pub queue: Option<Vec<TransactionRecord>>,
    pub failed_transactions: Option<Vec<TransactionRecord>>,
}

impl StatePatch {
    pub fn status(status: QueueStatus) -> Self {
        StatePatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_queue(mut self, queue: Vec<TransactionRecord>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_failed(mut self, failed: Vec<TransactionRecord>) -> Self {
        self.failed_transactions = Some(failed);
        self
    }

    /// Patch that overwrites every field with the given state
    pub fn replace(state: QueueState) -> Self {
        StatePatch {
            status: Some(state.status),
            queue: Some(state.queue),
            failed_transactions: Some(state.failed_transactions),
        }
    }
}

/// Mutual-exclusion token guarding `process_next`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingLock {
    /// Identity of the acquiring context
    pub holder: Uuid,

    pub acquired_at: DateTime<Utc>,
}

impl ProcessingLock {
    pub fn new(holder: Uuid, acquired_at: DateTime<Utc>) -> Self {
        Self {
            holder,
            acquired_at,
        }
    }

    /// A lock held longer than `timeout` may be taken over
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
        now.signed_duration_since(self.acquired_at) > timeout
    }
}

/// Transient flags maintained by the submitting side
///
/// `currently_processing` together with `current_transaction` is the
/// in-flight marker: if it survives a restart, that record was mid-submission
/// when the context went away.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFlags {
    #[serde(default)]
    pub currently_processing: bool,

    #[serde(default)]
    pub current_transaction: Option<TransactionId>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl PageFlags {
    pub fn in_flight(id: TransactionId, started_at: DateTime<Utc>) -> Self {
        PageFlags {
            currently_processing: true,
            current_transaction: Some(id),
            started_at: Some(started_at),
        }
    }

    /// Record id that was mid-submission, if any
    pub fn in_flight_id(&self) -> Option<TransactionId> {
        if self.currently_processing {
            self.current_transaction
        } else {
            None
        }
    }
}

/// Snapshot returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub status: QueueStatus,
    pub queued: usize,
    pub failed: usize,
    pub in_flight: Option<TransactionId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::fresh(5, false)]
    #[case::at_timeout(30, false)]
    #[case::past_timeout(31, true)]
    fn test_lock_staleness(#[case] age_secs: i64, #[case] stale: bool) {
        let now = Utc::now();
        let lock = ProcessingLock::new(Uuid::new_v4(), now - TimeDelta::seconds(age_secs));
        assert_eq!(lock.is_stale(now, TimeDelta::seconds(30)), stale);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(QueueStatus::WaitingConfirmation).unwrap(),
            "WAITING_CONFIRMATION"
        );
        assert_eq!(serde_json::to_value(QueueStatus::Idle).unwrap(), "IDLE");
    }

    #[test]
    fn test_state_defaults_from_empty_object() {
        let state: QueueState = serde_json::from_str("{}").unwrap();
        assert_eq!(state, QueueState::default());
        assert_eq!(state.status, QueueStatus::Idle);
    }

    #[test]
    fn test_in_flight_requires_both_flags() {
        let id = Uuid::new_v4();
        let mut flags = PageFlags::in_flight(id, Utc::now());
        assert_eq!(flags.in_flight_id(), Some(id));

        flags.currently_processing = false;
        assert_eq!(flags.in_flight_id(), None);
    }
}
