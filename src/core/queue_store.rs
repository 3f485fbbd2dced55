//! Persistent queue store
//!
//! This module provides the `QueueStore`, the only way the rest of the crate
//! reads or mutates the shared queue state, the processing lock, and the
//! page-side in-flight flags. All three live in a [`KeyValueStore`] under
//! fixed keys.
//!
//! # Invariants
//!
//! - `update_state` is the single place a queue is written, and it always
//!   deduplicates the queue first, so the persisted queue never holds two
//!   records with the same fingerprint.
//! - `acquire_lock` either installs a fresh lock or leaves the store
//!   untouched. A lock older than the timeout is taken over.
//!
//! # Persistence failures
//!
//! Reads never fail from the caller's point of view: an unreadable value is
//! logged and replaced by defaults. Writes return `Err` so callers can map
//! them to an outcome; they must re-read state afterwards rather than trust a
//! local copy.

use crate::core::dedupe::dedupe;
use crate::core::traits::KeyValueStore;
use crate::types::{
    PageFlags, ProcessingLock, QueueState, QueueStatus, StatePatch, StoreError, TransactionId,
    TransactionRecord,
};
use chrono::{TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Key of the `{status, queue, failedTransactions}` blob
pub const STATE_KEY: &str = "queue_state";

/// Key of the processing lock token
pub const LOCK_KEY: &str = "processing_lock";

/// Key of the page-side transient flags
pub const PAGE_FLAGS_KEY: &str = "page_flags";

/// Default age after which a lock is considered abandoned
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Queue state, lock and flags on top of a key/value store
#[derive(Debug)]
pub struct QueueStore<S> {
    kv: S,

    /// Identity written into locks acquired through this store
    holder: Uuid,
}

impl<S: KeyValueStore> QueueStore<S> {
    pub fn new(kv: S) -> Self {
        Self {
            kv,
            holder: Uuid::new_v4(),
        }
    }

    /// The underlying key/value store
    pub fn kv(&self) -> &S {
        &self.kv
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.kv.get(key).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::serialization(key, e)),
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|e| StoreError::serialization(key, e))?;
        self.kv.set(key, value).await
    }

    /// Read the persisted state, or defaults if none
    ///
    /// Never fails: read and decode errors are logged and yield defaults.
    pub async fn get_state(&self) -> QueueState {
        match self.read::<QueueState>(STATE_KEY).await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                log::warn!("Failed to read queue state, using defaults: {}", e);
                QueueState::default()
            }
        }
    }

    /// Whether the persisted state blob exists but cannot be decoded
    pub async fn state_is_unreadable(&self) -> bool {
        self.read::<QueueState>(STATE_KEY).await.is_err()
    }

    /// Merge `patch` into the persisted state
    ///
    /// A queue in the patch is deduplicated before it is written.
    pub async fn update_state(&self, patch: StatePatch) -> Result<QueueState, StoreError> {
        let mut state = self.get_state().await;

        if let Some(status) = patch.status {
            state.status = status;
        }
        if let Some(queue) = patch.queue {
            state.queue = dedupe(queue);
        }
        if let Some(failed) = patch.failed_transactions {
            state.failed_transactions = failed;
        }

        self.write(STATE_KEY, &state).await?;
        Ok(state)
    }

    /// Try to take the processing lock
    ///
    /// Succeeds when no lock is held or the held lock is older than
    /// `timeout`. A denied attempt leaves the store unchanged. Two concurrent
    /// callers cannot both succeed: the lock is installed with a
    /// compare-and-swap against the value that was inspected.
    pub async fn acquire_lock(&self, timeout: Duration) -> Result<bool, StoreError> {
        let now = Utc::now();
        let current = self.kv.get(LOCK_KEY).await?;

        if let Some(value) = &current {
            match serde_json::from_value::<ProcessingLock>(value.clone()) {
                Ok(lock) => {
                    let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
                    if !lock.is_stale(now, timeout) {
                        return Ok(false);
                    }
                    log::warn!(
                        "Taking over stale processing lock held by {} since {}",
                        lock.holder,
                        lock.acquired_at
                    );
                }
                Err(e) => log::warn!("Replacing unreadable processing lock: {}", e),
            }
        }

        let token = serde_json::to_value(ProcessingLock::new(self.holder, now))
            .map_err(|e| StoreError::serialization(LOCK_KEY, e))?;
        let acquired = self
            .kv
            .compare_and_swap(LOCK_KEY, current.as_ref(), token)
            .await?;
        if !acquired {
            log::debug!("Lost processing lock race");
        }
        Ok(acquired)
    }

    /// Drop the processing lock; a no-op when none is held
    pub async fn release_lock(&self) -> Result<(), StoreError> {
        self.kv.remove(LOCK_KEY).await
    }

    /// Currently held lock, if any
    pub async fn current_lock(&self) -> Option<ProcessingLock> {
        self.read(LOCK_KEY).await.ok().flatten()
    }

    /// Reset state to defaults and forget page-side flags
    pub async fn clear_state(&self) -> Result<(), StoreError> {
        self.write(STATE_KEY, &QueueState::default()).await?;
        self.kv.remove(PAGE_FLAGS_KEY).await?;
        log::info!("Queue state cleared");
        Ok(())
    }

    /// Queued record with the given id
    pub async fn get_by_id(&self, id: TransactionId) -> Option<TransactionRecord> {
        self.get_state()
            .await
            .queue
            .into_iter()
            .find(|record| record.id == id)
    }

    /// Remove a queued record by id
    ///
    /// Returns whether a record was removed. Status becomes `IDLE` when the
    /// queue ends up empty and is left unchanged otherwise.
    pub async fn remove_by_id(&self, id: TransactionId) -> Result<bool, StoreError> {
        let state = self.get_state().await;
        let before = state.queue.len();
        let queue: Vec<_> = state.queue.into_iter().filter(|r| r.id != id).collect();
        if queue.len() == before {
            return Ok(false);
        }

        let mut patch = StatePatch::default();
        if queue.is_empty() {
            patch.status = Some(QueueStatus::Idle);
        }
        self.update_state(patch.with_queue(queue)).await?;
        Ok(true)
    }

    /// Move every failed record back onto the queue with a fresh retry budget
    ///
    /// Returns how many records were requeued.
    pub async fn retry_failed(&self) -> Result<usize, StoreError> {
        let state = self.get_state().await;
        if state.failed_transactions.is_empty() {
            return Ok(0);
        }

        let count = state.failed_transactions.len();
        let mut queue = state.queue;
        queue.extend(state.failed_transactions.into_iter().map(|mut record| {
            record.processing_attempts = 0;
            record.last_attempt_timestamp = None;
            record
        }));

        self.update_state(
            StatePatch::status(QueueStatus::Processing)
                .with_queue(queue)
                .with_failed(Vec::new()),
        )
        .await?;
        Ok(count)
    }

    /// Page-side flags, defaults if absent or unreadable
    pub async fn page_flags(&self) -> PageFlags {
        match self.read::<PageFlags>(PAGE_FLAGS_KEY).await {
            Ok(flags) => flags.unwrap_or_default(),
            Err(e) => {
                log::warn!("Failed to read page flags: {}", e);
                PageFlags::default()
            }
        }
    }

    pub async fn set_page_flags(&self, flags: &PageFlags) -> Result<(), StoreError> {
        self.write(PAGE_FLAGS_KEY, flags).await
    }

    pub async fn clear_page_flags(&self) -> Result<(), StoreError> {
        self.kv.remove(PAGE_FLAGS_KEY).await
    }

    /// Write a raw value under any key, bypassing encoding
    #[cfg(test)]
    pub(crate) async fn put_raw(&self, key: &str, value: serde_json::Value) {
        self.kv.set(key, value).await.unwrap();
    }
}
