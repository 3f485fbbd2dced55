//! Dry-run submission channel
//!
//! Logs every record it is handed and reports success without talking to
//! anything external. Useful for checking what an import would submit.

use crate::core::traits::{SubmissionChannel, SubmissionOutcome};
use crate::types::{ChannelError, TransactionRecord};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Channel that accepts everything
#[derive(Debug, Default)]
pub struct DryRunChannel {
    submitted: AtomicUsize,
}

impl DryRunChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records accepted so far
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

impl SubmissionChannel for DryRunChannel {
    async fn submit(&self, record: &TransactionRecord) -> Result<SubmissionOutcome, ChannelError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "[dry-run] {} | {} | sold {} | proceeds {} | basis {} | {:?} {:?}",
            record.id,
            record.description,
            record.sale_date,
            record.sales_price,
            record.cost_basis,
            record.term,
            record.transaction_type
        );
        Ok(SubmissionOutcome::Success)
    }
}
