//! CSV format handling for transaction records
//!
//! This module centralizes all cell-level format concerns, providing:
//! - Locale-agnostic amount parsing
//! - The date normalization rule
//! - Conversion from a typed field map to a canonical record
//! - Canonical record output serialization
//!
//! All functions are pure (no I/O) for easy testing.

use crate::io::mapping::{CanonicalField, FieldMap};
use crate::types::{ImportError, Term, TransactionRecord, TransactionType};
use chrono::{DateTime, NaiveDate};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::io::Write;
use std::str::FromStr;
use uuid::Uuid;

/// Formats tried when a date is neither `YYYYMMDD` nor `M/D/YYYY`
const GENERAL_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%y",
    "%m-%d-%Y",
    "%m-%d-%y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d-%b-%Y",
    "%d-%b-%y",
];

/// Parse a currency or quantity cell
///
/// Strips `$`, thousands separators and whitespace, and reads accounting
/// parentheses as a negative sign. Numbers too small for `Decimal`'s 28
/// places (`9e-100`) read as zero. Returns `None` when nothing numeric is
/// left, or the value is beyond `Decimal`'s range; callers that need a value
/// substitute zero.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '"') && !c.is_whitespace())
        .collect();

    let (negative, digits) = match cleaned
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, cleaned.as_str()),
    };

    if digits.is_empty() {
        return None;
    }

    let value = match Decimal::from_str(digits).or_else(|_| Decimal::from_scientific(digits)) {
        Ok(value) => value,
        Err(_) => out_of_scale(digits)?,
    };

    Some(if negative { -value } else { value })
}

/// Numeric text `Decimal` rejects because of its exponent
fn out_of_scale(digits: &str) -> Option<Decimal> {
    let value = digits.parse::<f64>().ok().filter(|v| v.is_finite())?;
    if value.abs() < SMALLEST_DECIMAL {
        return Some(Decimal::ZERO);
    }
    Decimal::from_f64(value)
}

const SMALLEST_DECIMAL: f64 = 1e-28;

/// Normalize a date cell
///
/// - `YYYYMMDD` (8 digits, no separators)
/// - `M/D/YYYY` with one- or two-digit month and day
/// - anything else through a list of general calendar formats
///
/// Returns `None` when no shape matches; the interpreter then substitutes
/// its current date.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        let year: i32 = raw[0..4].parse().ok()?;
        let month: u32 = raw[4..6].parse().ok()?;
        let day: u32 = raw[6..8].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }

    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() == 3 && parts[2].len() == 4 {
        if let (Ok(month), Ok(day), Ok(year)) = (
            parts[0].parse::<u32>(),
            parts[1].parse::<u32>(),
            parts[2].parse::<i32>(),
        ) {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date);
            }
        }
    }

    parse_general_date(raw)
}

fn parse_general_date(raw: &str) -> Option<NaiveDate> {
    if let Some(date) = GENERAL_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
    {
        return Some(date);
    }

    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.date_naive())
        .ok()
}

/// Interpret a yes/no style cell
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_uppercase().as_str(),
        "TRUE" | "T" | "YES" | "Y" | "X" | "1"
    )
}

/// Convert a field map into a canonical record
///
/// The row must carry a description, a sale date, and at least one numeric
/// sales price or cost basis (zero and negative count). The missing amount,
/// if any, becomes zero. Dates that cannot be parsed become `today`, with a
/// [`ImportError::DateFallback`] pushed onto `diagnostics`.
///
/// # Arguments
///
/// * `fields` - Typed row values
/// * `line` - Source line number, for diagnostics
/// * `today` - Date substituted for unparseable dates
/// * `diagnostics` - Collector for non-fatal warnings
pub fn convert_field_map(
    fields: &FieldMap,
    line: u64,
    today: NaiveDate,
    diagnostics: &mut Vec<ImportError>,
) -> Result<TransactionRecord, ImportError> {
    let description = fields
        .get(CanonicalField::Description)
        .ok_or_else(|| ImportError::missing_field(line, CanonicalField::Description.label()))?;
    let raw_sale_date = fields
        .get(CanonicalField::SaleDate)
        .ok_or_else(|| ImportError::missing_field(line, CanonicalField::SaleDate.label()))?;

    let sales_price = fields.get(CanonicalField::SalesPrice).and_then(parse_amount);
    let cost_basis = fields.get(CanonicalField::CostBasis).and_then(parse_amount);
    if sales_price.is_none() && cost_basis.is_none() {
        return Err(ImportError::NoAmount { line });
    }

    let mut date_or_today = |raw: &str| {
        normalize_date(raw).unwrap_or_else(|| {
            diagnostics.push(ImportError::DateFallback {
                line,
                raw: raw.to_string(),
                substituted: today.to_string(),
            });
            today
        })
    };

    let sale_date = date_or_today(raw_sale_date);
    let date_acquired = fields.get(CanonicalField::DateAcquired).map(&mut date_or_today);

    Ok(TransactionRecord {
        id: Uuid::new_v4(),
        description: description.to_string(),
        sale_date,
        date_acquired,
        sales_price: sales_price.unwrap_or(Decimal::ZERO),
        cost_basis: cost_basis.unwrap_or(Decimal::ZERO),
        shares: fields.get(CanonicalField::Shares).and_then(parse_amount),
        term: fields
            .get(CanonicalField::Term)
            .map(Term::parse)
            .unwrap_or_default(),
        transaction_type: TransactionType::classify(description),
        non_covered: fields
            .get(CanonicalField::NonCovered)
            .is_some_and(parse_flag),
        ordinary_income: fields
            .get(CanonicalField::OrdinaryIncome)
            .is_some_and(parse_flag),
        account_number: fields.get(CanonicalField::AccountNumber).map(str::to_string),
        tax_year: fields.get(CanonicalField::TaxYear).map(str::to_string),
        processing_attempts: 0,
        last_attempt_timestamp: None,
    })
}

/// Write canonical records to CSV format
///
/// Records are written in the given order under a fixed header.
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_records_csv(
    records: &[TransactionRecord],
    output: &mut dyn Write,
) -> Result<(), String> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer
        .write_record([
            "id",
            "description",
            "sale_date",
            "date_acquired",
            "sales_price",
            "cost_basis",
            "shares",
            "term",
            "transaction_type",
            "non_covered",
            "ordinary_income",
            "account_number",
            "tax_year",
        ])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    for record in records {
        let term = match record.term {
            Term::Short => "SHORT",
            Term::Long => "LONG",
        };
        let transaction_type = match record.transaction_type {
            TransactionType::Stock => "STOCK",
            TransactionType::Option => "OPTION",
            TransactionType::Crypto => "CRYPTO",
            TransactionType::Other => "OTHER",
        };

        writer
            .write_record(&[
                record.id.to_string(),
                record.description.clone(),
                record.sale_date.to_string(),
                record
                    .date_acquired
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                format!("{:.2}", record.sales_price),
                format!("{:.2}", record.cost_basis),
                record.shares.map(|s| s.to_string()).unwrap_or_default(),
                term.to_string(),
                transaction_type.to_string(),
                record.non_covered.to_string(),
                record.ordinary_income.to_string(),
                record.account_number.clone().unwrap_or_default(),
                record.tax_year.clone().unwrap_or_default(),
            ])
            .map_err(|e| format!("Failed to write transaction record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}
