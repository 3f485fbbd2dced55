//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `transaction`: the canonical transaction record and its fingerprint
//! - `queue`: persisted queue state, lock token and in-flight flags
//! - `error`: error types for the import engine

pub mod error;
pub mod queue;
pub mod transaction;

pub use error::{ChannelError, ConfigError, CoordinatorError, ImportError, StoreError};
pub use queue::{PageFlags, ProcessingLock, QueueState, QueueStatus, QueueSummary, StatePatch};
pub use transaction::{
    round_cents, Fingerprint, Term, TransactionId, TransactionRecord, TransactionType,
};
