//! Transaction processor
//!
//! This module provides the `TransactionProcessor`, which drains the
//! persisted queue one record at a time through a [`SubmissionChannel`].
//!
//! # Design
//!
//! Every step re-reads state from the [`QueueStore`] and persists its result
//! before returning, so the submitting context can be torn down between any
//! two steps and a new processor picks up where the old one stopped:
//!
//! ```text
//! process_next
//!     ├── acquire_lock          (denied → RETRY, nothing touched)
//!     ├── settle abandoned in-flight marker
//!     ├── read head             (empty → SUCCESS)
//!     ├── attempts ≥ max        (→ failed list, FAILED)
//!     ├── persist in-flight marker + attempt timestamp
//!     ├── channel.submit
//!     ├── state_machine::apply  (persisted)
//!     └── clear marker, release_lock   (every path)
//! ```
//!
//! # Crash recovery
//!
//! The in-flight marker in the page flags names the record being submitted.
//! If it survives a restart, [`TransactionProcessor::recover`] treats that
//! record as submitted and drops it. A submission that actually failed right
//! before the restart is misclassified this way; recovery logs a warning
//! whenever it makes that call.
//!
//! The marker belongs to whoever holds the processing lock, so recovery only
//! runs under the lock. While another context holds a live lock, `recover`
//! leaves everything alone; a marker abandoned by a crashed holder is
//! settled by the first `process_next` that takes over the stale lock.

use crate::core::dedupe::merge;
use crate::core::queue_store::{QueueStore, DEFAULT_LOCK_TIMEOUT};
use crate::core::state_machine::{self, ProcessOutcome};
use crate::core::traits::{KeyValueStore, SubmissionChannel};
use crate::types::{
    PageFlags, QueueStatus, QueueSummary, StatePatch, StoreError, TransactionId,
    TransactionRecord,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Tuning knobs for the processor
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessorConfig {
    /// Submissions allowed per record before it is routed to the failed list
    pub max_attempts: u32,
    /// Age after which a held processing lock may be taken over
    pub lock_timeout: Duration,
    /// Pause between two steps of a drain loop
    pub retry_delay: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl ProcessorConfig {
    /// Create a ProcessorConfig with custom values
    ///
    /// Zero values are invalid and fall back to the defaults with a warning.
    pub fn new(max_attempts: u32, lock_timeout: Duration, retry_delay: Duration) -> Self {
        let default = Self::default();

        let max_attempts = if max_attempts == 0 {
            log::warn!(
                "Invalid max_attempts ({}), using default ({})",
                max_attempts,
                default.max_attempts
            );
            default.max_attempts
        } else {
            max_attempts
        };

        let lock_timeout = if lock_timeout.is_zero() {
            log::warn!(
                "Invalid lock_timeout ({:?}), using default ({:?})",
                lock_timeout,
                default.lock_timeout
            );
            default.lock_timeout
        } else {
            lock_timeout
        };

        let retry_delay = if retry_delay.is_zero() {
            log::warn!(
                "Invalid retry_delay ({:?}), using default ({:?})",
                retry_delay,
                default.retry_delay
            );
            default.retry_delay
        } else {
            retry_delay
        };

        Self {
            max_attempts,
            lock_timeout,
            retry_delay,
        }
    }
}

/// What `recover` found and repaired
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// The persisted state could not be decoded and was reset
    pub reset_unreadable_state: bool,
    /// Record that was mid-submission and has been dropped as submitted
    pub dropped_in_flight: Option<TransactionId>,
    /// A processing status with an empty queue was reset to `IDLE`
    pub reset_status: bool,
    /// Another context held a live processing lock; nothing was repaired
    pub lock_held_elsewhere: bool,
}

/// Drains the persisted queue through a submission channel
///
/// Generic over the key/value back end and the channel so either can be
/// replaced by a test double.
#[derive(Debug)]
pub struct TransactionProcessor<S, C> {
    store: QueueStore<S>,
    channel: C,
    config: ProcessorConfig,

    /// Set while a drain loop runs in this context
    draining: AtomicBool,
}

/// Clears the drain flag when the loop exits, including on cancellation
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<S: KeyValueStore, C: SubmissionChannel> TransactionProcessor<S, C> {
    pub fn new(store: QueueStore<S>, channel: C, config: ProcessorConfig) -> Self {
        Self {
            store,
            channel,
            config,
            draining: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &QueueStore<S> {
        &self.store
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Whether a drain loop is running in this context
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Submit the head of the queue once
    ///
    /// # Returns
    ///
    /// * `Success` - the head was accepted, or the queue was empty
    /// * `Retry` - the head was requeued, or another context holds the lock
    /// * `Failed` - the head was routed to the failed list, or an internal
    ///   error occurred (status is then `ERROR` and the queue is intact)
    pub async fn process_next(&self) -> ProcessOutcome {
        match self.store.acquire_lock(self.config.lock_timeout).await {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("Processing lock is held elsewhere");
                return ProcessOutcome::Retry;
            }
            Err(e) => {
                log::error!("Failed to acquire processing lock: {}", e);
                self.mark_error().await;
                return ProcessOutcome::Failed;
            }
        }

        let outcome = match self.process_locked().await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Processing step failed: {}", e);
                self.mark_error().await;
                ProcessOutcome::Failed
            }
        };

        if let Err(e) = self.store.clear_page_flags().await {
            log::warn!("Failed to clear in-flight marker: {}", e);
        }
        if let Err(e) = self.store.release_lock().await {
            log::warn!("Failed to release processing lock: {}", e);
        }
        outcome
    }

    async fn process_locked(&self) -> Result<ProcessOutcome, StoreError> {
        self.settle_in_flight().await?;

        let state = self.store.get_state().await;
        let Some(head) = state.queue.first() else {
            return Ok(ProcessOutcome::Success);
        };

        if head.processing_attempts >= self.config.max_attempts {
            log::warn!(
                "Transaction {} ({}) exhausted {} attempts, moving to failed",
                head.id,
                head.description,
                head.processing_attempts
            );
            let (next, outcome) = state_machine::exhaust(state);
            self.store.update_state(StatePatch::replace(next)).await?;
            return Ok(outcome);
        }

        let started_at = Utc::now();
        let mut queue = state.queue;
        queue[0].last_attempt_timestamp = Some(started_at);
        let record = queue[0].clone();

        self.store
            .set_page_flags(&PageFlags::in_flight(record.id, started_at))
            .await?;
        self.store
            .update_state(StatePatch::status(QueueStatus::Processing).with_queue(queue))
            .await?;

        log::info!(
            "Submitting transaction {} ({}), attempt {}",
            record.id,
            record.description,
            record.processing_attempts + 1
        );
        let result = self.channel.submit(&record).await;

        let state = self.store.get_state().await;
        if state.queue.first().map(|r| r.id) != Some(record.id) {
            log::warn!(
                "Queue changed while transaction {} was submitted; leaving it as is",
                record.id
            );
            return Ok(match result {
                Ok(outcome) => outcome.into(),
                Err(_) => ProcessOutcome::Failed,
            });
        }

        let (next, outcome) = match result {
            Ok(submission) => {
                log::info!("Transaction {} -> {:?}", record.id, submission);
                state_machine::apply(state, submission, Utc::now())
            }
            Err(e) => {
                log::error!("Submission of transaction {} failed: {}", record.id, e);
                state_machine::fault(state, Utc::now())
            }
        };
        self.store.update_state(StatePatch::replace(next)).await?;
        Ok(outcome)
    }

    async fn mark_error(&self) {
        if let Err(e) = self
            .store
            .update_state(StatePatch::status(QueueStatus::Error))
            .await
        {
            log::error!("Failed to record error status: {}", e);
        }
    }

    /// Drain the queue until it is empty or a record fails
    ///
    /// Returns `None` without doing anything if a drain is already running in
    /// this context. Otherwise returns the outcome that ended the loop:
    /// `Success` once the queue is empty (status `IDLE`), `Failed` when a
    /// step failed.
    pub async fn start_processing(&self) -> Option<ProcessOutcome> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Drain already running");
            return None;
        }
        let _guard = DrainGuard(&self.draining);

        loop {
            let outcome = self.process_next().await;
            if outcome == ProcessOutcome::Failed {
                log::warn!("Processing stopped on a failed transaction");
                return Some(outcome);
            }

            if self.store.get_state().await.queue.is_empty() {
                if let Err(e) = self
                    .store
                    .update_state(StatePatch::status(QueueStatus::Idle))
                    .await
                {
                    log::warn!("Failed to record idle status: {}", e);
                }
                log::info!("Queue drained");
                return Some(ProcessOutcome::Success);
            }

            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    /// Append records to the queue without draining it
    ///
    /// Records without an identity get a fresh one and start with zero
    /// attempts; records that already carry an identity keep their retry
    /// history. Records whose fingerprint is already queued are dropped.
    /// Returns how many records were actually added.
    pub async fn enqueue(&self, records: Vec<TransactionRecord>) -> Result<usize, StoreError> {
        let incoming: Vec<_> = records
            .into_iter()
            .map(|mut record| {
                if !record.has_identity() {
                    record.id = Uuid::new_v4();
                    record.processing_attempts = 0;
                    record.last_attempt_timestamp = None;
                }
                record
            })
            .collect();
        let offered = incoming.len();

        let state = self.store.get_state().await;
        let before = state.queue.len();
        let queue = merge(state.queue, incoming);
        let state = self
            .store
            .update_state(StatePatch::status(QueueStatus::Processing).with_queue(queue))
            .await?;

        let added = state.queue.len().saturating_sub(before);
        log::info!(
            "Queued {} of {} transactions ({} total)",
            added,
            offered,
            state.queue.len()
        );
        Ok(added)
    }

    /// Append records and drain the queue
    pub async fn queue_transactions(
        &self,
        records: Vec<TransactionRecord>,
    ) -> Result<usize, StoreError> {
        let added = self.enqueue(records).await?;
        self.start_processing().await;
        Ok(added)
    }

    /// Repair persisted state left behind by a context that went away
    ///
    /// Run once at startup, before any drain. Repairs happen under the
    /// processing lock; if another context holds a live lock the report has
    /// `lock_held_elsewhere` set and the store is left untouched.
    pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();

        if !self.store.acquire_lock(self.config.lock_timeout).await? {
            log::info!("Processing lock is held by another context, skipping recovery");
            report.lock_held_elsewhere = true;
            return Ok(report);
        }

        let repaired = self.recover_locked(&mut report).await;
        if let Err(e) = self.store.release_lock().await {
            log::warn!("Failed to release processing lock: {}", e);
        }
        repaired.map(|()| report)
    }

    async fn recover_locked(&self, report: &mut RecoveryReport) -> Result<(), StoreError> {
        if self.store.state_is_unreadable().await {
            log::warn!("Persisted queue state is unreadable, resetting it");
            self.store.clear_state().await?;
            report.reset_unreadable_state = true;
        }

        report.dropped_in_flight = self.settle_in_flight().await?;

        let state = self.store.get_state().await;
        let busy = matches!(
            state.status,
            QueueStatus::Processing | QueueStatus::WaitingConfirmation
        );
        if busy && state.queue.is_empty() {
            log::info!("Resetting {:?} status of empty queue to idle", state.status);
            self.store
                .update_state(StatePatch::status(QueueStatus::Idle))
                .await?;
            report.reset_status = true;
        }
        Ok(())
    }

    /// Drop the record named by an abandoned in-flight marker
    ///
    /// Caller must hold the processing lock. Returns the id of the record
    /// that was dropped as submitted.
    async fn settle_in_flight(&self) -> Result<Option<TransactionId>, StoreError> {
        let flags = self.store.page_flags().await;
        if flags == PageFlags::default() {
            return Ok(None);
        }

        let mut dropped = None;
        if let Some(id) = flags.in_flight_id() {
            if self.store.get_by_id(id).await.is_some() {
                log::warn!(
                    "Transaction {} was mid-submission when its context stopped; \
                     assuming it was submitted and dropping it from the queue",
                    id
                );
                self.store.remove_by_id(id).await?;
                dropped = Some(id);
            }
        }
        self.store.clear_page_flags().await?;
        Ok(dropped)
    }

    /// Confirmation from the submitting side for a queued record
    ///
    /// `success` drops the record. Otherwise it is retried later, or routed
    /// to the failed list once it has used up its attempts. Returns `None`
    /// if the record is not queued.
    pub async fn transaction_processed(
        &self,
        id: TransactionId,
        success: bool,
    ) -> Result<Option<ProcessOutcome>, StoreError> {
        let outcome = if success {
            self.store
                .remove_by_id(id)
                .await?
                .then_some(ProcessOutcome::Success)
        } else {
            let state = self.store.get_state().await;
            match state_machine::reject(state, id, self.config.max_attempts, Utc::now()) {
                Some((next, outcome)) => {
                    self.store.update_state(StatePatch::replace(next)).await?;
                    Some(outcome)
                }
                None => None,
            }
        };

        if outcome.is_some() && self.store.page_flags().await.in_flight_id() == Some(id) {
            self.store.clear_page_flags().await?;
        }
        Ok(outcome)
    }

    /// Current status, queue sizes and in-flight record
    pub async fn status(&self) -> QueueSummary {
        let state = self.store.get_state().await;
        let flags = self.store.page_flags().await;
        state.summary(flags.in_flight_id())
    }

    /// Forget the queue, the failed list and the in-flight marker
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear_state().await
    }

    /// Requeue every failed record with a fresh retry budget
    pub async fn retry_failed(&self) -> Result<usize, StoreError> {
        let count = self.store.retry_failed().await?;
        if count > 0 {
            log::info!("Requeued {} failed transactions", count);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kv::MemoryStore;
    use crate::core::queue_store::LOCK_KEY;
    use crate::core::traits::SubmissionOutcome;
    use crate::types::{ChannelError, ProcessingLock};
    use chrono::NaiveDate;
    use rstest::rstest;
    use rust_decimal::Decimal;
    use chrono::TimeDelta;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    /// Channel replaying a fixed script, then a default outcome
    struct ScriptedChannel {
        script: Mutex<VecDeque<Result<SubmissionOutcome, ChannelError>>>,
        fallback: SubmissionOutcome,
        calls: AtomicUsize,
        submitted: Mutex<Vec<TransactionId>>,
    }

    impl ScriptedChannel {
        fn always(outcome: SubmissionOutcome) -> Self {
            Self::scripted(Vec::new(), outcome)
        }

        fn scripted(
            script: Vec<Result<SubmissionOutcome, ChannelError>>,
            fallback: SubmissionOutcome,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SubmissionChannel for ScriptedChannel {
        async fn submit(
            &self,
            record: &TransactionRecord,
        ) -> Result<SubmissionOutcome, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.submitted.lock().unwrap().push(record.id);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(self.fallback))
        }
    }

    fn record(description: &str) -> TransactionRecord {
        TransactionRecord::new(
            description,
            NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            Decimal::new(10_000, 2),
            Decimal::new(8_000, 2),
        )
    }

    fn processor(
        channel: ScriptedChannel,
    ) -> TransactionProcessor<MemoryStore, ScriptedChannel> {
        TransactionProcessor::new(
            QueueStore::new(MemoryStore::new()),
            channel,
            ProcessorConfig::default(),
        )
    }

    #[rstest]
    #[case::all_defaults(3, 30_000, 1_000, 3, 30_000, 1_000)]
    #[case::custom(5, 10_000, 250, 5, 10_000, 250)]
    #[case::zero_attempts(0, 10_000, 250, 3, 10_000, 250)]
    #[case::zero_timeout(5, 0, 250, 5, 30_000, 250)]
    #[case::zero_delay(5, 10_000, 0, 5, 10_000, 1_000)]
    fn test_config_fallbacks(
        #[case] attempts: u32,
        #[case] timeout_ms: u64,
        #[case] delay_ms: u64,
        #[case] expected_attempts: u32,
        #[case] expected_timeout_ms: u64,
        #[case] expected_delay_ms: u64,
    ) {
        let config = ProcessorConfig::new(
            attempts,
            Duration::from_millis(timeout_ms),
            Duration::from_millis(delay_ms),
        );
        assert_eq!(config.max_attempts, expected_attempts);
        assert_eq!(config.lock_timeout, Duration::from_millis(expected_timeout_ms));
        assert_eq!(config.retry_delay, Duration::from_millis(expected_delay_ms));
    }

    #[tokio::test]
    async fn test_empty_queue_is_success_and_idle() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));

        assert_eq!(processor.process_next().await, ProcessOutcome::Success);
        assert_eq!(processor.store().get_state().await.status, QueueStatus::Idle);
        assert_eq!(processor.channel().calls(), 0);
        assert!(processor.store().current_lock().await.is_none());
    }

    #[tokio::test]
    async fn test_success_drops_head_and_completes() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        processor.enqueue(vec![record("AAPL")]).await.unwrap();

        assert_eq!(processor.process_next().await, ProcessOutcome::Success);

        let state = processor.store().get_state().await;
        assert!(state.queue.is_empty());
        assert_eq!(state.status, QueueStatus::Completed);
        assert_eq!(processor.store().page_flags().await, PageFlags::default());
        assert!(processor.store().current_lock().await.is_none());
    }

    #[tokio::test]
    async fn test_lock_denied_leaves_queue_untouched() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        processor.enqueue(vec![record("AAPL")]).await.unwrap();
        let before = processor.store().get_state().await;

        let foreign = ProcessingLock::new(Uuid::new_v4(), Utc::now());
        processor
            .store()
            .put_raw(LOCK_KEY, serde_json::to_value(&foreign).unwrap())
            .await;

        assert_eq!(processor.process_next().await, ProcessOutcome::Retry);
        assert_eq!(processor.store().get_state().await, before);
        assert_eq!(processor.channel().calls(), 0);
        assert_eq!(processor.store().current_lock().await, Some(foreign));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_is_three_submissions() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Retry));
        let added = processor
            .queue_transactions(vec![record("AAPL")])
            .await
            .unwrap();
        assert_eq!(added, 1);

        assert_eq!(processor.channel().calls(), 3);
        let state = processor.store().get_state().await;
        assert!(state.queue.is_empty());
        assert_eq!(state.failed_transactions.len(), 1);
        assert_eq!(state.failed_transactions[0].processing_attempts, 3);
        assert_eq!(state.status, QueueStatus::Error);
        assert!(!processor.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_processes_in_fifo_order() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        let records = vec![record("AAPL"), record("MSFT"), record("TSLA")];
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();

        processor.queue_transactions(records).await.unwrap();

        assert_eq!(*processor.channel().submitted.lock().unwrap(), ids);
        let state = processor.store().get_state().await;
        assert!(state.queue.is_empty());
        assert_eq!(state.status, QueueStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_moves_record_behind_others() {
        let channel = ScriptedChannel::scripted(
            vec![Ok(SubmissionOutcome::Retry)],
            SubmissionOutcome::Success,
        );
        let processor = processor(channel);
        let first = record("AAPL");
        let second = record("MSFT");
        let expected = vec![first.id, second.id, first.id];

        processor
            .queue_transactions(vec![first, second])
            .await
            .unwrap();

        assert_eq!(*processor.channel().submitted.lock().unwrap(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_record_stops_drain() {
        let channel = ScriptedChannel::scripted(
            vec![Ok(SubmissionOutcome::Failed)],
            SubmissionOutcome::Success,
        );
        let processor = processor(channel);

        processor
            .enqueue(vec![record("AAPL"), record("MSFT")])
            .await
            .unwrap();
        let outcome = processor.start_processing().await;

        assert_eq!(outcome, Some(ProcessOutcome::Failed));
        let state = processor.store().get_state().await;
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.failed_transactions.len(), 1);
        assert_eq!(state.status, QueueStatus::Processing);
    }

    #[tokio::test]
    async fn test_channel_fault_sets_error_and_keeps_queue() {
        let channel = ScriptedChannel::scripted(
            vec![Err(ChannelError::Io {
                message: "pipe closed".to_string(),
            })],
            SubmissionOutcome::Success,
        );
        let processor = processor(channel);
        processor.enqueue(vec![record("AAPL")]).await.unwrap();

        assert_eq!(processor.process_next().await, ProcessOutcome::Failed);

        let state = processor.store().get_state().await;
        assert_eq!(state.status, QueueStatus::Error);
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].processing_attempts, 1);
        assert!(processor.store().current_lock().await.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_reports_failed() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        processor.enqueue(vec![record("AAPL")]).await.unwrap();
        processor.store().kv().set_fail_writes(true);

        assert_eq!(processor.process_next().await, ProcessOutcome::Failed);
        assert_eq!(processor.channel().calls(), 0);

        processor.store().kv().set_fail_writes(false);
        let state = processor.store().get_state().await;
        assert_eq!(state.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_assigns_ids_and_dedupes() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        let mut anonymous = record("AAPL");
        anonymous.id = Uuid::nil();
        anonymous.processing_attempts = 2;

        assert_eq!(
            processor
                .enqueue(vec![anonymous.clone(), record("AAPL")])
                .await
                .unwrap(),
            1
        );
        assert_eq!(processor.enqueue(vec![record("AAPL")]).await.unwrap(), 0);

        let state = processor.store().get_state().await;
        assert_eq!(state.status, QueueStatus::Processing);
        assert_eq!(state.queue.len(), 1);
        assert!(state.queue[0].has_identity());
        assert_eq!(state.queue[0].processing_attempts, 0);
    }

    #[tokio::test]
    async fn test_enqueue_keeps_retry_history_of_identified_records() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        let attempted_at = Utc::now();
        let mut retried = record("AAPL");
        retried.processing_attempts = 2;
        retried.last_attempt_timestamp = Some(attempted_at);
        let id = retried.id;

        processor.enqueue(vec![retried]).await.unwrap();

        let queued = processor.store().get_by_id(id).await.unwrap();
        assert_eq!(queued.processing_attempts, 2);
        assert_eq!(queued.last_attempt_timestamp, Some(attempted_at));
    }

    #[tokio::test]
    async fn test_start_processing_is_not_reentrant() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        processor.draining.store(true, Ordering::SeqCst);

        assert_eq!(processor.start_processing().await, None);
        assert!(processor.is_draining());
    }

    #[tokio::test]
    async fn test_recover_drops_in_flight_record() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        let in_flight = record("AAPL");
        let id = in_flight.id;
        processor
            .enqueue(vec![in_flight, record("MSFT")])
            .await
            .unwrap();
        processor
            .store()
            .set_page_flags(&PageFlags::in_flight(id, Utc::now()))
            .await
            .unwrap();

        let report = processor.recover().await.unwrap();

        assert_eq!(report.dropped_in_flight, Some(id));
        assert!(!report.reset_status);
        let state = processor.store().get_state().await;
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].description, "MSFT");
        assert_eq!(processor.store().page_flags().await, PageFlags::default());
    }

    /// Channel that parks inside `submit` until released
    struct GateChannel {
        entered: Notify,
        release: Notify,
        outcome: SubmissionOutcome,
    }

    impl GateChannel {
        fn new(outcome: SubmissionOutcome) -> Self {
            Self {
                entered: Notify::new(),
                release: Notify::new(),
                outcome,
            }
        }
    }

    impl SubmissionChannel for GateChannel {
        async fn submit(
            &self,
            _record: &TransactionRecord,
        ) -> Result<SubmissionOutcome, ChannelError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.outcome)
        }
    }

    #[tokio::test]
    async fn test_recover_leaves_live_submission_alone() {
        let kv = Arc::new(MemoryStore::new());
        let submitting = Arc::new(TransactionProcessor::new(
            QueueStore::new(Arc::clone(&kv)),
            GateChannel::new(SubmissionOutcome::Retry),
            ProcessorConfig::default(),
        ));
        let starting = TransactionProcessor::new(
            QueueStore::new(Arc::clone(&kv)),
            ScriptedChannel::always(SubmissionOutcome::Success),
            ProcessorConfig::default(),
        );
        let in_flight = record("AAPL");
        let id = in_flight.id;
        submitting.enqueue(vec![in_flight]).await.unwrap();

        let step = tokio::spawn({
            let submitting = Arc::clone(&submitting);
            async move { submitting.process_next().await }
        });
        submitting.channel().entered.notified().await;

        let report = starting.recover().await.unwrap();
        assert!(report.lock_held_elsewhere);
        assert_eq!(report.dropped_in_flight, None);
        assert_eq!(starting.store().page_flags().await.in_flight_id(), Some(id));

        submitting.channel().release.notify_one();
        assert_eq!(step.await.unwrap(), ProcessOutcome::Retry);

        let state = starting.store().get_state().await;
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].id, id);
        assert_eq!(state.queue[0].processing_attempts, 1);
        assert_eq!(state.status, QueueStatus::WaitingConfirmation);
        assert!(starting.store().current_lock().await.is_none());
    }

    #[tokio::test]
    async fn test_abandoned_in_flight_record_is_settled_on_lock_takeover() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        let abandoned = record("AAPL");
        let next = record("MSFT");
        let (abandoned_id, next_id) = (abandoned.id, next.id);
        processor.enqueue(vec![abandoned, next]).await.unwrap();

        let crashed = ProcessingLock::new(Uuid::new_v4(), Utc::now() - TimeDelta::seconds(60));
        processor
            .store()
            .put_raw(LOCK_KEY, serde_json::to_value(&crashed).unwrap())
            .await;
        processor
            .store()
            .set_page_flags(&PageFlags::in_flight(abandoned_id, Utc::now()))
            .await
            .unwrap();

        assert_eq!(processor.process_next().await, ProcessOutcome::Success);

        assert_eq!(*processor.channel().submitted.lock().unwrap(), vec![next_id]);
        let state = processor.store().get_state().await;
        assert!(state.queue.is_empty());
        assert!(state.failed_transactions.is_empty());
        assert_eq!(processor.store().page_flags().await, PageFlags::default());
    }

    #[tokio::test]
    async fn test_recover_resets_busy_status_of_empty_queue() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        processor
            .store()
            .update_state(StatePatch::status(QueueStatus::WaitingConfirmation))
            .await
            .unwrap();

        let report = processor.recover().await.unwrap();

        assert!(report.reset_status);
        assert_eq!(processor.store().get_state().await.status, QueueStatus::Idle);
    }

    #[tokio::test]
    async fn test_recover_resets_unreadable_state() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        processor
            .store()
            .put_raw(crate::core::queue_store::STATE_KEY, serde_json::json!([1, 2]))
            .await;

        let report = processor.recover().await.unwrap();

        assert!(report.reset_unreadable_state);
        assert!(!processor.store().state_is_unreadable().await);
    }

    #[tokio::test]
    async fn test_transaction_processed() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Success));
        let a = record("AAPL");
        let b = record("MSFT");
        let (a_id, b_id) = (a.id, b.id);
        processor.enqueue(vec![a, b]).await.unwrap();

        assert_eq!(
            processor.transaction_processed(a_id, false).await.unwrap(),
            Some(ProcessOutcome::Retry)
        );
        let state = processor.store().get_state().await;
        assert_eq!(state.queue[1].id, a_id);
        assert_eq!(state.status, QueueStatus::WaitingConfirmation);

        assert_eq!(
            processor.transaction_processed(b_id, true).await.unwrap(),
            Some(ProcessOutcome::Success)
        );
        assert_eq!(
            processor.transaction_processed(b_id, true).await.unwrap(),
            None
        );
        assert_eq!(processor.status().await.queued, 1);
    }

    #[tokio::test]
    async fn test_retry_failed_and_clear() {
        let processor = processor(ScriptedChannel::always(SubmissionOutcome::Failed));
        processor.enqueue(vec![record("AAPL")]).await.unwrap();
        assert_eq!(processor.process_next().await, ProcessOutcome::Failed);
        assert_eq!(processor.status().await.failed, 1);

        assert_eq!(processor.retry_failed().await.unwrap(), 1);
        let summary = processor.status().await;
        assert_eq!((summary.queued, summary.failed), (1, 0));

        processor.clear().await.unwrap();
        let summary = processor.status().await;
        assert_eq!(summary.status, QueueStatus::Idle);
        assert_eq!((summary.queued, summary.failed), (0, 0));
    }
}
