//! Record transformer
//!
//! Turns decoded source fields into typed cells following a
//! [`TableSchema`]. Nothing here fails: a field that cannot be coerced
//! becomes NULL.

use chrono::NaiveDate;
use sqlx::types::BigDecimal;
use std::str::FromStr;

use crate::reader::RawRecord;
use crate::schema::{ColumnKind, TableSchema};

/// Date fields that mean "no date"
const NULL_DATES: [&str; 3] = ["", "0", "00000000"];

/// Placeholders some publishers emit for missing text
const NULL_TEXT: [&str; 3] = ["None", "nan", "NaN"];

/// One typed cell, null-aware
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(Option<String>),
    Int(Option<i32>),
    Decimal(Option<BigDecimal>),
    Date(Option<NaiveDate>),
}

impl Value {
    pub fn null(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Text => Value::Text(None),
            ColumnKind::Int => Value::Int(None),
            ColumnKind::Decimal => Value::Decimal(None),
            ColumnKind::Date => Value::Date(None),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Text(v) => v.is_none(),
            Value::Int(v) => v.is_none(),
            Value::Decimal(v) => v.is_none(),
            Value::Date(v) => v.is_none(),
        }
    }

    /// Coerce a raw field into a cell of the given kind
    pub fn parse(kind: ColumnKind, raw: String) -> Self {
        match kind {
            ColumnKind::Text => Value::Text(normalize_text(raw)),
            ColumnKind::Int => Value::Int(parse_int(&raw)),
            ColumnKind::Decimal => Value::Decimal(normalize_decimal(&raw)),
            ColumnKind::Date => Value::Date(normalize_date(&raw)),
        }
    }
}

/// A transformed record, one cell per schema column
pub type Row = Vec<Value>;

/// Parse an 8-digit `YYYYMMDD` date
///
/// Sentinels, wrong lengths, non-digits and impossible dates give `None`.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if NULL_DATES.contains(&s) || s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[4..6].parse().ok()?;
    let day: u32 = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a comma-decimal amount such as `"1500,75"`
///
/// Only the first comma is replaced; thousands separators are not expected.
pub fn normalize_decimal(raw: &str) -> Option<BigDecimal> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    BigDecimal::from_str(&s.replacen(',', ".", 1)).ok()
}

pub fn parse_int(raw: &str) -> Option<i32> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

/// Blank and placeholder text becomes NULL; NUL bytes are dropped
pub fn normalize_text(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || NULL_TEXT.contains(&trimmed) {
        return None;
    }
    if raw.contains('\0') {
        return Some(raw.replace('\0', ""));
    }
    Some(raw)
}

/// Transform one record
///
/// Only the first `source_width` fields are used; missing trailing fields
/// and schema columns beyond `source_width` are NULL.
pub fn transform_record(schema: &TableSchema, record: RawRecord, source_width: usize) -> Row {
    let mut fields = record.into_iter().take(source_width);
    schema
        .columns
        .iter()
        .map(|column| match fields.next() {
            Some(raw) => Value::parse(column.kind, raw),
            None => Value::null(column.kind),
        })
        .collect()
}

/// Transform a window of records, consuming it
pub fn transform_window(schema: &TableSchema, window: Vec<RawRecord>, source_width: usize) -> Vec<Row> {
    window
        .into_iter()
        .map(|record| transform_record(schema, record, source_width))
        .collect()
}
