//! Error types for the tax import engine
//!
//! Errors are designed to be descriptive and user-friendly for CLI output.
//!
//! # Error Categories
//!
//! - **Import diagnostics** ([`ImportError`]): per-row CSV problems. Never fatal;
//!   the interpreter collects them next to the records it could derive.
//! - **Persistence errors** ([`StoreError`]): key/value back end failures.
//! - **Submission channel errors** ([`ChannelError`]): the channel could not
//!   produce an outcome at all (as opposed to reporting FAILED).
//! - **Coordinator errors** ([`CoordinatorError`]): request/response plumbing.
//! - **Configuration errors** ([`ConfigError`]): column mapping files.
//!
//! Lock contention is deliberately absent: a denied lock is a normal RETRY
//! outcome, not an error.

use thiserror::Error;

/// Non-fatal problem found while interpreting a CSV file
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImportError {
    /// The CSV reader could not read a row
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    CsvParse {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the parsing error
        message: String,
    },

    /// A required cell was empty
    #[error("Line {line}: missing {field}")]
    MissingField {
        line: u64,
        /// Canonical name of the missing field
        field: String,
    },

    /// Neither sales price nor cost basis held a number
    #[error("Line {line}: no numeric sales price or cost basis")]
    NoAmount { line: u64 },

    /// The generic layout could not find the minimum set of columns
    #[error("Unrecognized layout: no column for {}", missing.join(", "))]
    UnresolvedColumns { missing: Vec<String> },

    /// A date could not be parsed and today's date was substituted
    #[error("Line {line}: unparseable date '{raw}', using {substituted}")]
    DateFallback {
        line: u64,
        raw: String,
        substituted: String,
    },

    /// The input contained no rows at all
    #[error("Input contains no rows")]
    Empty,
}

impl ImportError {
    pub fn missing_field(line: u64, field: &str) -> Self {
        ImportError::MissingField {
            line,
            field: field.to_string(),
        }
    }

    pub fn unresolved_columns(missing: &[&str]) -> Self {
        ImportError::UnresolvedColumns {
            missing: missing.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl From<csv::Error> for ImportError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        ImportError::CsvParse {
            line,
            message: error.to_string(),
        }
    }
}

/// Failure of the key/value persistence back end
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// I/O error reading or writing the backing file
    #[error("Storage I/O error: {message}")]
    Io { message: String },

    /// A persisted value could not be (de)serialized
    #[error("Storage serialization error for '{key}': {message}")]
    Serialization { key: String, message: String },
}

impl StoreError {
    pub fn serialization(key: &str, error: impl std::fmt::Display) -> Self {
        StoreError::Serialization {
            key: key.to_string(),
            message: error.to_string(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        StoreError::Io {
            message: error.to_string(),
        }
    }
}

/// The submission channel could not report an outcome
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    /// The external submitter could not be started
    #[error("Failed to start submitter '{program}': {message}")]
    Spawn { program: String, message: String },

    /// Talking to the external submitter failed midway
    #[error("Submitter I/O error: {message}")]
    Io { message: String },

    /// The record could not be handed to the submitter
    #[error("Failed to encode transaction {id}: {message}")]
    Encode { id: String, message: String },
}

impl From<std::io::Error> for ChannelError {
    fn from(error: std::io::Error) -> Self {
        ChannelError::Io {
            message: error.to_string(),
        }
    }
}

/// Failure of a coordinator request/response exchange
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The coordinator task is gone; no response will arrive
    #[error("Coordinator is not running")]
    Disconnected,

    /// A referenced transaction is not in the queue
    #[error("Transaction {id} is not queued")]
    UnknownTransaction { id: String },
}

/// Problem loading user configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {message}")]
    Read { path: String, message: String },

    #[error("Invalid config '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Unknown column field '{field}' in mapping")]
    UnknownField { field: String },
}
