//! In-memory key/value store
//!
//! `MemoryStore` keeps values in a `DashMap`, so it can be shared between
//! tasks and threads without an outer lock. Its contents live as long as the
//! store; it is the back end for tests and for ephemeral runs.
//!
//! Writes can be made to fail on demand, which lets tests exercise the
//! best-effort persistence paths of the queue store and processor.

use crate::core::traits::KeyValueStore;
use crate::types::StoreError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

/// Thread-safe in-memory key/value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Io {
                message: "write rejected".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.check_writable()?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        current: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        // The entry guard makes the comparison and the write one step
        let swapped = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if current == Some(entry.get()) {
                    entry.insert(new);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                if current.is_none() {
                    entry.insert(new);
                    true
                } else {
                    false
                }
            }
        };
        Ok(swapped)
    }
}
