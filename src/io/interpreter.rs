//! CSV interpreter: layout detection and conversion to canonical records
//!
//! Turns the raw text of a spreadsheet export into canonical
//! [`TransactionRecord`]s. Two layouts are understood:
//!
//! - **Primary (1099-B section)**: rows are read without a header
//!   assumption. A row whose first two cells are `1099-B`, `ACCOUNT NUMBER`
//!   supplies the column headers; following rows whose first cell starts with
//!   `1099-B` are transactions, until the next `ACCOUNT NUMBER` row starts a
//!   new section.
//! - **Generic**: the first row holds header names, resolved to canonical
//!   fields through the synonym table in [`crate::io::mapping`].
//!
//! # Error Handling
//!
//! Interpretation never fails. Rows that cannot be converted are skipped and
//! described in [`InterpretResult::errors`]; everything derivable is returned.
//! The record list is always deduplicated before it is handed back.

use crate::core::dedupe::dedupe;
use crate::io::csv_format::convert_field_map;
use crate::io::mapping::{CanonicalField, ColumnMapping, FieldMap, HeaderIndex};
use crate::types::{ImportError, TransactionRecord};
use chrono::{Local, NaiveDate};
use csv::{ReaderBuilder, StringRecord, Trim};

/// First cell of every row belonging to the primary layout
pub const LAYOUT_TAG: &str = "1099-B";

/// Second cell of a primary-layout header row
pub const SECTION_MARKER: &str = "ACCOUNT NUMBER";

/// Fields the generic layout must resolve before any row is read
const REQUIRED_FIELDS: [CanonicalField; 2] = [CanonicalField::Description, CanonicalField::SaleDate];

/// Layout an input was interpreted with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// 1099-B section with an `ACCOUNT NUMBER` header row
    Primary,
    /// Header row resolved through column synonyms
    Generic,
    /// Neither layout applied; no records
    Unrecognized,
}

/// Outcome of interpreting one file
#[derive(Debug, Clone)]
pub struct InterpretResult {
    /// Deduplicated canonical records
    pub records: Vec<TransactionRecord>,

    /// Human-readable diagnostics for skipped rows and substitutions
    pub errors: Vec<ImportError>,

    pub layout: Layout,
}

/// A CSV row with its source line number
struct Row {
    line: u64,
    cells: StringRecord,
}

impl Row {
    fn cell(&self, i: usize) -> &str {
        self.cells.get(i).unwrap_or("")
    }

    fn is_blank(&self) -> bool {
        self.cells.iter().all(str::is_empty)
    }

    fn is_section_header(&self) -> bool {
        self.cell(0).eq_ignore_ascii_case(LAYOUT_TAG)
            && self.cell(1).eq_ignore_ascii_case(SECTION_MARKER)
    }
}

/// CSV interpreter
///
/// Holds the column mapping and, optionally, a fixed date to substitute for
/// unparseable dates. Without one, each call uses the local date at the time
/// it runs.
///
/// # Examples
///
/// ```
/// use rust_tax_import_engine::io::Interpreter;
///
/// let csv = "DESCRIPTION,SALE DATE,PROCEEDS,COST BASIS\nAAPL,01/15/2024,100.00,90.00\n";
/// let result = Interpreter::default().interpret(csv);
/// assert_eq!(result.records.len(), 1);
/// assert_eq!(result.records[0].sale_date.to_string(), "2024-01-15");
/// ```
#[derive(Debug, Clone)]
pub struct Interpreter {
    mapping: ColumnMapping,
    today: Option<NaiveDate>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(ColumnMapping::default())
    }
}

impl Interpreter {
    /// Create an interpreter using the current local date for date fallbacks
    pub fn new(mapping: ColumnMapping) -> Self {
        Self {
            mapping,
            today: None,
        }
    }

    /// Pin the date substituted for unparseable dates
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn fallback_date(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Interpret raw file bytes
    ///
    /// Invalid UTF-8 is replaced rather than rejected and a leading byte
    /// order mark is dropped.
    pub fn interpret_bytes(&self, bytes: &[u8]) -> InterpretResult {
        let text = String::from_utf8_lossy(bytes);
        self.interpret(&text)
    }

    /// Interpret the text content of a CSV file
    pub fn interpret(&self, raw_text: &str) -> InterpretResult {
        let raw_text = raw_text.strip_prefix('\u{feff}').unwrap_or(raw_text);
        let mut errors = Vec::new();
        let rows = read_rows(raw_text, &mut errors);
        let today = self.fallback_date();

        if rows.is_empty() {
            errors.push(ImportError::Empty);
            return InterpretResult {
                records: Vec::new(),
                errors,
                layout: Layout::Unrecognized,
            };
        }

        let (records, layout) = match rows.iter().position(Row::is_section_header) {
            Some(header_at) => (
                self.interpret_primary(&rows, header_at, today, &mut errors),
                Layout::Primary,
            ),
            None => self.interpret_generic(&rows, today, &mut errors),
        };

        let records = dedupe(records);
        log::info!(
            "Interpreted {} transaction(s) ({:?} layout, {} diagnostic(s))",
            records.len(),
            layout,
            errors.len()
        );

        InterpretResult {
            records,
            errors,
            layout,
        }
    }

    fn interpret_primary(
        &self,
        rows: &[Row],
        header_at: usize,
        today: NaiveDate,
        errors: &mut Vec<ImportError>,
    ) -> Vec<TransactionRecord> {
        let headers = header_names(&rows[header_at].cells);
        let index = self.mapping.resolve(&headers);

        let mut records = Vec::new();
        for row in &rows[header_at + 1..] {
            if row.cell(1).eq_ignore_ascii_case(SECTION_MARKER) {
                log::debug!("New section at line {}, stopping", row.line);
                break;
            }
            if !row.cell(0).to_uppercase().starts_with(LAYOUT_TAG) {
                continue;
            }
            convert_row(row, &index, today, &mut records, errors);
        }
        records
    }

    fn interpret_generic(
        &self,
        rows: &[Row],
        today: NaiveDate,
        errors: &mut Vec<ImportError>,
    ) -> (Vec<TransactionRecord>, Layout) {
        let headers = header_names(&rows[0].cells);
        let index = self.mapping.resolve(&headers);

        let mut missing = index.missing(&REQUIRED_FIELDS);
        if !index.has(CanonicalField::SalesPrice) && !index.has(CanonicalField::CostBasis) {
            missing.push("sales price or cost basis");
        }
        if !missing.is_empty() {
            errors.push(ImportError::unresolved_columns(&missing));
            return (Vec::new(), Layout::Unrecognized);
        }

        let mut records = Vec::new();
        for row in &rows[1..] {
            convert_row(row, &index, today, &mut records, errors);
        }
        (records, Layout::Generic)
    }
}

fn convert_row(
    row: &Row,
    index: &HeaderIndex,
    today: NaiveDate,
    records: &mut Vec<TransactionRecord>,
    errors: &mut Vec<ImportError>,
) {
    let fields = FieldMap::from_row(&row.cells, index);
    match convert_field_map(&fields, row.line, today, errors) {
        Ok(record) => records.push(record),
        Err(e) => {
            log::warn!("Skipping row: {}", e);
            errors.push(e);
        }
    }
}

fn header_names(cells: &StringRecord) -> Vec<String> {
    cells.iter().map(|c| c.trim().to_uppercase()).collect()
}

/// Read every non-blank row, recording unreadable ones as diagnostics
fn read_rows(raw_text: &str, errors: &mut Vec<ImportError>) -> Vec<Row> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(raw_text.as_bytes());

    let mut rows = Vec::new();
    for (i, result) in reader.records().enumerate() {
        match result {
            Ok(cells) => {
                let line = cells
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(i as u64 + 1);
                let row = Row { line, cells };
                if !row.is_blank() {
                    rows.push(row);
                }
            }
            Err(e) => errors.push(e.into()),
        }
    }
    rows
}
