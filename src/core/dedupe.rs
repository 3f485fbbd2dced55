//! Fingerprint-based duplicate suppression
//!
//! The same sale can arrive through more than one import (a broker's 1099-B
//! export and a hand-made spreadsheet, or the same file imported twice). The
//! deduplicator collapses such records to one per [`Fingerprint`].
//!
//! # Stability
//!
//! For records sharing a fingerprint the first occurrence in input order
//! wins, and survivors keep their first-occurrence order. Because of this the
//! operation is idempotent: `dedupe(dedupe(x)) == dedupe(x)`.
//!
//! [`Fingerprint`]: crate::types::Fingerprint

use crate::types::TransactionRecord;
use std::collections::HashSet;

/// Remove records whose fingerprint was already seen
pub fn dedupe(records: Vec<TransactionRecord>) -> Vec<TransactionRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    let before = records.len();

    let unique: Vec<TransactionRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.fingerprint()))
        .collect();

    if unique.len() < before {
        log::debug!("Dropped {} duplicate transaction(s)", before - unique.len());
    }

    unique
}

/// Append `incoming` to `existing`, keeping only the first copy of each fingerprint
///
/// Records already present in `existing` take precedence over incoming ones,
/// so re-importing a file never resets the retry metadata of queued records.
pub fn merge(
    existing: Vec<TransactionRecord>,
    incoming: Vec<TransactionRecord>,
) -> Vec<TransactionRecord> {
    let mut combined = existing;
    combined.extend(incoming);
    dedupe(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn record(description: &str, price: &str, basis: &str) -> TransactionRecord {
        TransactionRecord::new(
            description,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            Decimal::from_str(price).unwrap(),
            Decimal::from_str(basis).unwrap(),
        )
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let first = record("AAPL", "100", "90");
        let mut second = record("AAPL", "100.00", "90.00");
        second.processing_attempts = 2;
        let other = record("MSFT", "50", "40");

        let result = dedupe(vec![first.clone(), other.clone(), second]);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, first.id);
        assert_eq!(result[0].processing_attempts, 0);
        assert_eq!(result[1].id, other.id);
    }

    #[test]
    fn test_dedupe_treats_sub_cent_differences_as_duplicates() {
        let result = dedupe(vec![
            record("AAPL", "100.001", "90.004"),
            record("AAPL", "100.004", "89.996"),
        ]);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let input = vec![
            record("AAPL", "100", "90"),
            record("AAPL", "100", "90"),
            record("MSFT", "1", "1"),
            record("AAPL", "100", "91"),
            record("MSFT", "1.000", "1"),
        ];

        let once = dedupe(input);
        let twice = dedupe(once.clone());

        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_dedupe_empty() {
        assert!(dedupe(Vec::new()).is_empty());
    }

    #[test]
    fn test_merge_prefers_existing_records() {
        let mut queued = record("AAPL", "100", "90");
        queued.processing_attempts = 1;
        let reimported = record("AAPL", "100", "90");
        let fresh = record("TSLA", "10", "5");

        let merged = merge(vec![queued.clone()], vec![reimported, fresh.clone()]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, queued.id);
        assert_eq!(merged[0].processing_attempts, 1);
        assert_eq!(merged[1].id, fresh.id);
    }
}
