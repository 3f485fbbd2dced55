//! Core traits for persistence and record submission
//!
//! This module defines the two seams of the processing core: the durable
//! key/value store the queue lives in, and the external channel records are
//! submitted through. Both are asynchronous; every call is a suspension point.
//!
//! The futures are required to be `Send` so a processor built on any
//! implementation can be driven from a spawned tokio task.

use crate::types::{ChannelError, StoreError, TransactionRecord};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Durable key/value store holding whole JSON values
///
/// Implementations must survive process restarts (or, for test doubles,
/// the lifetime of the test) and apply each call atomically with respect to
/// other calls on the same store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key was never written or was removed
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a value; removing a missing key is not an error
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Write `new` only if the stored value still equals `current`
    ///
    /// `current == None` means "only if the key is absent". Returns whether
    /// the write happened.
    fn compare_and_swap(
        &self,
        key: &str,
        current: Option<&Value>,
        new: Value,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// A shared store, so several processors can work against one back end
impl<T: KeyValueStore> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        current: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        (**self).compare_and_swap(key, current, new).await
    }
}

/// Result reported by the external submission channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionOutcome {
    /// The record was accepted
    Success,
    /// Not accepted yet; try again later
    Retry,
    /// Rejected permanently
    Failed,
}

/// Channel that submits one record to the external form
///
/// Delivery is at-least-once: the same record may be submitted again after a
/// restart, so the receiving side must tolerate duplicates. An `Err` means no
/// outcome could be obtained at all.
pub trait SubmissionChannel: Send + Sync {
    fn submit(
        &self,
        record: &TransactionRecord,
    ) -> impl Future<Output = Result<SubmissionOutcome, ChannelError>> + Send;
}
