//! Column-name mapping between CSV headers and canonical record fields
//!
//! Spreadsheets exported by different brokers name the same column in
//! different ways ("SALE DATE", "DATE SOLD", "SETTLEMENT DATE", ...). This
//! module owns the closed set of canonical fields, the built-in synonym table,
//! user-supplied extra synonyms, and the typed field map a CSV row is
//! converted into.

use crate::types::ConfigError;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Canonical fields a CSV column can feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalField {
    Description,
    SaleDate,
    DateAcquired,
    SalesPrice,
    CostBasis,
    Shares,
    Term,
    NonCovered,
    OrdinaryIncome,
    AccountNumber,
    TaxYear,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 11] = [
        CanonicalField::Description,
        CanonicalField::SaleDate,
        CanonicalField::DateAcquired,
        CanonicalField::SalesPrice,
        CanonicalField::CostBasis,
        CanonicalField::Shares,
        CanonicalField::Term,
        CanonicalField::NonCovered,
        CanonicalField::OrdinaryIncome,
        CanonicalField::AccountNumber,
        CanonicalField::TaxYear,
    ];

    /// Human-readable name used in diagnostics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::SaleDate => "sale date",
            Self::DateAcquired => "date acquired",
            Self::SalesPrice => "sales price",
            Self::CostBasis => "cost basis",
            Self::Shares => "shares",
            Self::Term => "term",
            Self::NonCovered => "noncovered",
            Self::OrdinaryIncome => "ordinary income",
            Self::AccountNumber => "account number",
            Self::TaxYear => "tax year",
        }
    }

    /// Built-in header names, most specific first
    pub fn builtin_synonyms(&self) -> &'static [&'static str] {
        match self {
            Self::Description => &[
                "DESCRIPTION",
                "SECURITY DESCRIPTION",
                "DESCRIPTION OF PROPERTY",
                "SECURITY",
                "SECURITY NAME",
                "NAME",
                "ASSET",
                "SYMBOL",
            ],
            Self::SaleDate => &[
                "SALE DATE",
                "SOLD",
                "DATE SOLD",
                "SOLD DATE",
                "SETTLEMENT DATE",
                "DATE SOLD OR DISPOSED",
            ],
            Self::DateAcquired => &[
                "DATE ACQUIRED",
                "ACQUIRED",
                "ACQUIRED DATE",
                "ACQUISITION DATE",
                "PURCHASE DATE",
            ],
            Self::SalesPrice => &[
                "SALES PRICE",
                "SALE PRICE",
                "PROCEEDS",
                "GROSS PROCEEDS",
                "SALES PROCEEDS",
            ],
            Self::CostBasis => &["COST BASIS", "COST OR OTHER BASIS", "COST", "BASIS"],
            Self::Shares => &["SHARES", "QUANTITY", "QTY", "UNITS"],
            Self::Term => &["TERM", "HOLDING PERIOD", "SHORT/LONG", "GAIN TYPE"],
            Self::NonCovered => &[
                "NONCOVERED",
                "NON-COVERED",
                "NON COVERED",
                "NONCOVERED SECURITY",
            ],
            Self::OrdinaryIncome => &["ORDINARY", "ORDINARY INCOME", "ORDINARY GAIN"],
            Self::AccountNumber => &["ACCOUNT NUMBER", "ACCOUNT", "ACCOUNT #", "ACCOUNT NO"],
            Self::TaxYear => &["TAX YEAR", "YEAR"],
        }
    }
}

/// Normalize a header cell for comparison
pub fn normalize_header(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// User-supplied column synonyms
///
/// Loaded from a JSON file of the form
/// `{"synonyms": {"saleDate": ["TRADE DATE"], "salesPrice": ["NET"]}}`.
/// User synonyms are tried before the built-in table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default)]
    pub synonyms: HashMap<CanonicalField, Vec<String>>,
}

impl ColumnMapping {
    /// Load a mapping file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse a mapping from JSON text
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| {
            // serde reports an unknown enum key as "unknown variant"
            let message = e.to_string();
            match message
                .strip_prefix("unknown variant `")
                .and_then(|rest| rest.split('`').next())
            {
                Some(field) => ConfigError::UnknownField {
                    field: field.to_string(),
                },
                None => ConfigError::Parse {
                    path: "<inline>".to_string(),
                    message,
                },
            }
        })
    }

    /// Header names for a field, user synonyms first, all normalized
    pub fn synonyms_for(&self, field: CanonicalField) -> Vec<String> {
        let user = self
            .synonyms
            .get(&field)
            .into_iter()
            .flatten()
            .map(|s| normalize_header(s));
        let builtin = field
            .builtin_synonyms()
            .iter()
            .map(|s| s.to_string());
        let mut names: Vec<String> = Vec::new();
        for name in user.chain(builtin) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Resolve each canonical field to a column position
    pub fn resolve(&self, headers: &[String]) -> HeaderIndex {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut columns = HashMap::new();

        for field in CanonicalField::ALL {
            let position = self
                .synonyms_for(field)
                .iter()
                .find_map(|name| normalized.iter().position(|h| h == name));
            if let Some(position) = position {
                columns.insert(field, position);
            }
        }

        for (i, header) in normalized.iter().enumerate() {
            if !header.is_empty() && !columns.values().any(|&p| p == i) {
                log::debug!("Ignoring unmapped column '{}'", header);
            }
        }

        HeaderIndex { columns }
    }
}

/// Canonical field → column position for one header row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderIndex {
    columns: HashMap<CanonicalField, usize>,
}

impl HeaderIndex {
    pub fn has(&self, field: CanonicalField) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn position(&self, field: CanonicalField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// Fields from `required` that did not resolve
    pub fn missing(&self, required: &[CanonicalField]) -> Vec<&'static str> {
        required
            .iter()
            .filter(|f| !self.has(**f))
            .map(|f| f.label())
            .collect()
    }
}

/// Typed view of one CSV row
///
/// Only canonical fields are present; empty cells and cells past the end of a
/// short row are absent rather than empty strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    values: HashMap<CanonicalField, String>,
}

impl FieldMap {
    /// Map a row positionally through a header index
    pub fn from_row(row: &StringRecord, index: &HeaderIndex) -> Self {
        let mut values = HashMap::new();
        for field in CanonicalField::ALL {
            let cell = index
                .position(field)
                .and_then(|p| row.get(p))
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(cell) = cell {
                values.insert(field, cell.to_string());
            }
        }
        FieldMap { values }
    }

    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn insert(&mut self, field: CanonicalField, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case("SALE DATE")]
    #[case("sold")]
    #[case(" Date Sold ")]
    #[case("SOLD DATE")]
    #[case("SETTLEMENT DATE")]
    fn test_sale_date_synonyms(#[case] header: &str) {
        let index = ColumnMapping::default().resolve(&headers(&["DESCRIPTION", header]));
        assert_eq!(index.position(CanonicalField::SaleDate), Some(1));
    }

    #[test]
    fn test_user_synonyms_take_priority() {
        let mapping = ColumnMapping::from_json(r#"{"synonyms": {"saleDate": ["trade date"]}}"#)
            .unwrap();
        let index = mapping.resolve(&headers(&["SALE DATE", "TRADE DATE"]));
        assert_eq!(index.position(CanonicalField::SaleDate), Some(1));
    }

    #[test]
    fn test_unknown_field_in_mapping_is_rejected() {
        let result = ColumnMapping::from_json(r#"{"synonyms": {"price": ["NET"]}}"#);
        assert_eq!(
            result,
            Err(ConfigError::UnknownField {
                field: "price".to_string()
            })
        );
    }

    #[test]
    fn test_load_mapping_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"synonyms": {"costBasis": ["ADJUSTED BASIS"]}}"#)
            .unwrap();
        file.flush().unwrap();

        let mapping = ColumnMapping::load(file.path()).unwrap();
        assert_eq!(
            mapping.synonyms_for(CanonicalField::CostBasis)[0],
            "ADJUSTED BASIS"
        );
    }

    #[test]
    fn test_load_missing_mapping_file() {
        let result = ColumnMapping::load(Path::new("does-not-exist.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_missing_reports_labels() {
        let index = ColumnMapping::default().resolve(&headers(&["DESCRIPTION", "PROCEEDS"]));
        assert_eq!(
            index.missing(&[CanonicalField::Description, CanonicalField::SaleDate]),
            vec!["sale date"]
        );
    }

    #[test]
    fn test_field_map_skips_empty_and_short_cells() {
        let index = ColumnMapping::default().resolve(&headers(&[
            "DESCRIPTION",
            "SALE DATE",
            "PROCEEDS",
            "COST BASIS",
        ]));
        let row = StringRecord::from(vec!["AAPL", "", " 100.00 "]);
        let fields = FieldMap::from_row(&row, &index);

        assert_eq!(fields.get(CanonicalField::Description), Some("AAPL"));
        assert_eq!(fields.get(CanonicalField::SaleDate), None);
        assert_eq!(fields.get(CanonicalField::SalesPrice), Some("100.00"));
        assert_eq!(fields.get(CanonicalField::CostBasis), None);
    }
}
