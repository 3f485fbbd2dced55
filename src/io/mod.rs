//! I/O module
//!
//! Handles CSV interpretation and output.
//!
//! # Components
//!
//! - `mapping` - Canonical fields, header synonyms, typed row field maps
//! - `csv_format` - Cell parsing, record conversion, output serialization
//! - `interpreter` - Layout detection and file-level interpretation

pub mod csv_format;
pub mod interpreter;
pub mod mapping;

pub use csv_format::{convert_field_map, normalize_date, parse_amount, write_records_csv};
pub use interpreter::{InterpretResult, Interpreter, Layout};
pub use mapping::{CanonicalField, ColumnMapping, FieldMap};
