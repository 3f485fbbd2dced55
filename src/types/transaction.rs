//! Transaction-related types for the tax import engine
//!
//! This module defines the canonical transaction record produced by the CSV
//! interpreter, its classification enums, and the fingerprint used to detect
//! duplicate transactions across import sources.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transaction identifier
///
/// Random (v4) UUID generated when a record is created. The nil UUID marks a
/// record whose identity has not been assigned yet.
pub type TransactionId = Uuid;

/// Holding period of a sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Term {
    /// Held one year or less. Used whenever the source does not say.
    #[default]
    Short,

    /// Held more than one year
    Long,
}

impl Term {
    /// Interpret a free-text term cell
    ///
    /// Anything that does not clearly say "long" is treated as short term.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_uppercase();
        if normalized == "L" || normalized.starts_with("LONG") {
            Term::Long
        } else {
            Term::Short
        }
    }
}

/// Kind of security a transaction refers to
///
/// Derived from the description text by [`TransactionType::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Ordinary equity sale
    Stock,

    /// Option contract (description names a CALL or PUT)
    Option,

    /// Cryptocurrency disposal
    Crypto,

    /// No description to classify
    Other,
}

/// Keywords that mark a description as a cryptocurrency disposal
///
/// Matched as substrings of the upper-cased description, so pairs such as
/// `ETHUSD` count. Tickers that are common inside ordinary words (`SOL`,
/// `ADA`, `DOT`, `LINK`) are left out; their full names are listed instead.
pub const CRYPTO_KEYWORDS: &[&str] = &[
    "BITCOIN", "BTC", "ETHEREUM", "ETH", "LITECOIN", "LTC", "DOGECOIN", "DOGE", "SOLANA",
    "CARDANO", "RIPPLE", "XRP", "POLKADOT", "CHAINLINK", "USDC", "USDT", "TETHER", "CRYPTO",
];

impl TransactionType {
    /// Classify a transaction from its description
    ///
    /// Rules are checked in order, case-insensitively:
    /// 1. contains `" CALL "` or `" PUT "` → [`TransactionType::Option`]
    /// 2. contains one of [`CRYPTO_KEYWORDS`] → [`TransactionType::Crypto`]
    /// 3. ends in a digit followed by a single `C` → [`TransactionType::Crypto`]
    /// 4. otherwise → [`TransactionType::Stock`]
    ///
    /// An empty description yields [`TransactionType::Other`].
    pub fn classify(description: &str) -> Self {
        let upper = description.trim().to_uppercase();
        if upper.is_empty() {
            return TransactionType::Other;
        }

        // Untrimmed: a bare trailing "CALL" does not count.
        let raw_upper = description.to_uppercase();
        if raw_upper.contains(" CALL ") || raw_upper.contains(" PUT ") {
            return TransactionType::Option;
        }

        if CRYPTO_KEYWORDS.iter().any(|keyword| upper.contains(keyword)) {
            return TransactionType::Crypto;
        }

        let mut tail = upper.chars().rev();
        if let (Some('C'), Some(prev)) = (tail.next(), tail.next()) {
            if prev.is_ascii_digit() {
                return TransactionType::Crypto;
            }
        }

        TransactionType::Stock
    }
}

/// Duplicate-detection key for a transaction
///
/// Two records describe the same transaction iff their fingerprints are
/// equal. Amounts are rounded to cents so that float-ish noise beyond the
/// second decimal place does not split duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub description: String,
    pub sale_date: NaiveDate,
    pub sales_price: Decimal,
    pub cost_basis: Decimal,
}

/// Round a currency amount to cents, half away from zero
pub fn round_cents(amount: Decimal) -> Decimal {
    amount
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// Canonical transaction record
///
/// The normalized shape every input layout is converted into. Records are
/// immutable once created, apart from the retry metadata
/// (`processing_attempts`, `last_attempt_timestamp`) maintained by the
/// transaction processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Opaque identity; not part of the fingerprint
    #[serde(default)]
    pub id: TransactionId,

    /// Security or asset name
    pub description: String,

    /// Date of sale, always ISO-normalized
    pub sale_date: NaiveDate,

    #[serde(default)]
    pub date_acquired: Option<NaiveDate>,

    /// Proceeds; zero and negative amounts are valid
    pub sales_price: Decimal,

    /// Cost basis; zero is valid (e.g. exercised options)
    pub cost_basis: Decimal,

    #[serde(default)]
    pub shares: Option<Decimal>,

    #[serde(default)]
    pub term: Term,

    pub transaction_type: TransactionType,

    #[serde(default)]
    pub non_covered: bool,

    #[serde(default)]
    pub ordinary_income: bool,

    #[serde(default)]
    pub account_number: Option<String>,

    #[serde(default)]
    pub tax_year: Option<String>,

    /// Number of RETRY outcomes seen so far
    #[serde(default)]
    pub processing_attempts: u32,

    /// Time of the most recent submission attempt
    #[serde(default)]
    pub last_attempt_timestamp: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// Create a record with a fresh identity and default optional fields
    ///
    /// The transaction type is derived from the description.
    pub fn new(
        description: impl Into<String>,
        sale_date: NaiveDate,
        sales_price: Decimal,
        cost_basis: Decimal,
    ) -> Self {
        let description = description.into();
        let transaction_type = TransactionType::classify(&description);
        TransactionRecord {
            id: Uuid::new_v4(),
            description,
            sale_date,
            date_acquired: None,
            sales_price,
            cost_basis,
            shares: None,
            term: Term::Short,
            transaction_type,
            non_covered: false,
            ordinary_income: false,
            account_number: None,
            tax_year: None,
            processing_attempts: 0,
            last_attempt_timestamp: None,
        }
    }

    /// Duplicate-detection key of this record
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            description: self.description.clone(),
            sale_date: self.sale_date,
            sales_price: round_cents(self.sales_price),
            cost_basis: round_cents(self.cost_basis),
        }
    }

    /// Whether the record has been assigned an identity (non-nil id)
    pub fn has_identity(&self) -> bool {
        !self.id.is_nil()
    }
}
