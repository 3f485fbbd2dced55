//! Core processing module
//!
//! This module contains the queue-processing components:
//! - `traits` - Seams for the key/value store and the submission channel
//! - `kv` - Key/value store back ends (in-memory, JSON file)
//! - `dedupe` - Fingerprint-based duplicate removal
//! - `queue_store` - Persisted queue state, processing lock and page flags
//! - `state_machine` - Pure queue transitions per submission outcome
//! - `processor` - Drains the queue one record at a time
//! - `coordinator` - Request/response boundary for the submitting side

pub mod coordinator;
pub mod dedupe;
pub mod kv;
pub mod processor;
pub mod queue_store;
pub mod state_machine;
pub mod traits;

pub use coordinator::{Coordinator, CoordinatorHandle, Request, Response};
pub use dedupe::{dedupe, merge};
pub use kv::{JsonFileStore, MemoryStore};
pub use processor::{ProcessorConfig, RecoveryReport, TransactionProcessor};
pub use queue_store::QueueStore;
pub use state_machine::ProcessOutcome;
pub use traits::{KeyValueStore, SubmissionChannel, SubmissionOutcome};
