//! Rust Tax Import Engine Library
//! # Overview
//!
//! This library imports capital-gain transaction rows (1099-B style) from
//! spreadsheet CSV exports, normalizes them into canonical records, and
//! drives them one at a time into an external submission channel through a
//! persisted queue that survives restarts of the submitting context.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (records, queue state, errors)
//! - [`io`] - CSV interpretation, column mapping and canonical CSV output
//! - [`core`] - Processing components:
//!   - [`core::queue_store`] - Persisted queue, processing lock, in-flight flags
//!   - [`core::state_machine`] - Queue transitions per submission outcome
//!   - [`core::processor`] - One-at-a-time draining with retries and recovery
//!   - [`core::coordinator`] - Request/response boundary for the page side
//! - [`channel`] - Submission channels (dry run, external command)
//! - [`cli`] - CLI arguments parsing and command execution
//!
//! # Queue States
//!
//! - **IDLE**: nothing queued, or the last drain finished
//! - **PROCESSING**: records are being submitted
//! - **WAITING_CONFIRMATION**: the head record asked to be retried later
//! - **COMPLETED**: the last record was submitted successfully
//! - **ERROR**: a record failed permanently or processing hit an internal error
//!
//! # Duplicates
//!
//! Two records are the same transaction when description, sale date, and the
//! two amounts rounded to cents match. The queue never holds two such records.

// Module declarations
pub mod channel;
pub mod cli;
pub mod core;
pub mod io;
pub mod types;

pub use channel::{AnyChannel, CommandChannel, DryRunChannel};
pub use core::{
    Coordinator, JsonFileStore, MemoryStore, ProcessOutcome, ProcessorConfig, QueueStore,
    TransactionProcessor,
};
pub use io::{write_records_csv, Interpreter};
pub use types::{
    ImportError, QueueState, QueueStatus, TransactionId, TransactionRecord, TransactionType,
};
