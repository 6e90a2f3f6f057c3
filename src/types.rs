//! Core types and constants

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// EDINET entity code (e.g. `E01234`)
pub type EdinetCode = String;

/// EDINET document identifier
pub type DocId = String;

/// Missing-value sentinel used by every numeric column
pub const MISSING: f64 = f64::NAN;

/// Identifier columns of a fact table
pub const COL_EDINET_CODE: &str = "edinetCode";
pub const COL_DOC_ID: &str = "docID";
pub const COL_DOC_TYPE_CODE: &str = "docTypeCode";
pub const COL_PERIOD_START: &str = "periodStart";
pub const COL_PERIOD_END: &str = "periodEnd";
pub const COL_CURRENCY: &str = "Currency";
pub const COL_SUBMIT_DATE_TIME: &str = "submitDateTime";
pub const COL_ACCOUNTING_TERM: &str = "AccountingTerm";
pub const COL_PERIOD: &str = "Period";
pub const COL_AMOUNT: &str = "Amount";

/// Index of the wide ratio table, in output order
pub const RATIO_INDEX_COLUMNS: [&str; 5] = [
    COL_EDINET_CODE,
    COL_DOC_ID,
    COL_DOC_TYPE_CODE,
    COL_PERIOD_START,
    COL_PERIOD_END,
];

/// Columns that never take part in numeric processing or predictor search
pub const NON_NUMERIC_COLUMNS: [&str; 10] = [
    "index",
    "level_0",
    COL_EDINET_CODE,
    COL_DOC_ID,
    COL_DOC_TYPE_CODE,
    COL_PERIOD_START,
    COL_PERIOD_END,
    COL_CURRENCY,
    COL_SUBMIT_DATE_TIME,
    COL_PERIOD,
];

/// True when `name` is an identifier/period/currency column (case-insensitive)
pub fn is_identifier_column(name: &str) -> bool {
    NON_NUMERIC_COLUMNS
        .iter()
        .any(|c| c.eq_ignore_ascii_case(name))
}

/// A missing value is NaN; infinities are values until a consumer says otherwise
#[inline]
pub fn is_missing(value: f64) -> bool {
    value.is_nan()
}

/// Normalise ±inf to the missing sentinel
#[inline]
pub fn finite_or_missing(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        MISSING
    }
}

/// Round half away from zero to `decimals` places; missing and infinite values pass through
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    // -0.0 persists as "-0.0" in SQLite text dumps
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Parse the date part of an EDINET period/date string (`YYYY-MM-DD[ ...]`)
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// A single tagged line item from a filing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedFact {
    /// Taxonomy code, e.g. `jppfs_cor:NetSales`
    pub accounting_term: String,
    /// Period context, e.g. `CurrentYearDuration`
    pub period: String,
    pub currency: Option<String>,
    /// Raw amount as filed; non-numeric text is kept and coerced later
    pub amount: Option<String>,
    pub doc_id: DocId,
    pub edinet_code: EdinetCode,
    pub doc_type_code: String,
    pub submit_date_time: Option<String>,
    pub period_start: String,
    pub period_end: String,
}

impl TaggedFact {
    /// Column order used when a facts table is created
    pub const COLUMNS: [&'static str; 10] = [
        COL_ACCOUNTING_TERM,
        COL_PERIOD,
        COL_CURRENCY,
        COL_AMOUNT,
        COL_DOC_ID,
        COL_EDINET_CODE,
        COL_DOC_TYPE_CODE,
        COL_SUBMIT_DATE_TIME,
        COL_PERIOD_START,
        COL_PERIOD_END,
    ];

    /// Pivot key: `AccountingTerm_Period`
    pub fn pivot_key(&self) -> String {
        format!("{}_{}", self.accounting_term, self.period)
    }
}
