//! Column-oriented in-memory table
//!
//! `Frame` is the dataset every derivation step works on: a fact table read
//! from SQLite, the pivoted per-entity ratio table, or a regression result set.
//! Numeric columns use `f64::NAN` as the missing-value sentinel, so IEEE
//! arithmetic propagates missing values without any special casing.

use crate::error::{RatioError, Result};
use crate::types::{is_missing, round_to, MISSING};
use hashbrown::HashMap;
use rusqlite::types::Value;

/// A single raw value as stored in SQLite
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    /// Coerce to a number; anything unparseable becomes missing
    pub fn as_f64(&self) -> f64 {
        match self {
            Cell::Null => MISSING,
            Cell::Integer(v) => *v as f64,
            Cell::Real(v) => *v,
            Cell::Text(s) => parse_numeric(s),
        }
    }

    /// Render as text; `None` for NULL
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Integer(v) => Some(v.to_string()),
            Cell::Real(v) => Some(v.to_string()),
            Cell::Text(s) => Some(s.clone()),
        }
    }

    /// NULL, or a NaN real
    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Real(v) => v.is_nan(),
            _ => false,
        }
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        match value {
            Value::Null | Value::Blob(_) => Cell::Null,
            Value::Integer(v) => Cell::Integer(v),
            Value::Real(v) => Cell::Real(v),
            Value::Text(s) => Cell::Text(s),
        }
    }
}

/// Parse filed amounts such as `"1,234"` or `" -5.5 "`
pub fn parse_numeric(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return MISSING;
    }
    trimmed
        .replace(',', "")
        .parse::<f64>()
        .unwrap_or(MISSING)
}

/// A typed column
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Text(Vec<Option<String>>),
    Numeric(Vec<f64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Text(v) => v.len(),
            Column::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Numeric(_))
    }

    /// Numeric view of the column (text is parsed, failures become missing)
    pub fn to_numeric(&self) -> Vec<f64> {
        match self {
            Column::Numeric(v) => v.clone(),
            Column::Text(v) => v
                .iter()
                .map(|s| s.as_deref().map(parse_numeric).unwrap_or(MISSING))
                .collect(),
        }
    }

    /// Text value at `row`
    pub fn text_at(&self, row: usize) -> Option<String> {
        match self {
            Column::Text(v) => v.get(row).cloned().flatten(),
            Column::Numeric(v) => v
                .get(row)
                .filter(|x| !is_missing(**x))
                .map(|x| x.to_string()),
        }
    }

    /// Raw cell at `row`; out-of-range rows read as NULL
    pub fn cell_at(&self, row: usize) -> Cell {
        match self {
            Column::Text(v) => match v.get(row) {
                Some(Some(s)) => Cell::Text(s.clone()),
                _ => Cell::Null,
            },
            Column::Numeric(v) => match v.get(row) {
                Some(x) if !is_missing(*x) => Cell::Real(*x),
                _ => Cell::Null,
            },
        }
    }

    /// SQLite value at `row`; missing numbers are written as NULL
    pub fn sql_value(&self, row: usize) -> Value {
        match self {
            Column::Text(v) => match v.get(row) {
                Some(Some(s)) => Value::Text(s.clone()),
                _ => Value::Null,
            },
            Column::Numeric(v) => match v.get(row) {
                Some(x) if !is_missing(*x) => Value::Real(*x),
                _ => Value::Null,
            },
        }
    }

    /// Keep only rows where `mask` is true
    fn filter(&self, mask: &[bool]) -> Column {
        match self {
            Column::Text(v) => Column::Text(
                v.iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(x, _)| x.clone())
                    .collect(),
            ),
            Column::Numeric(v) => Column::Numeric(
                v.iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(x, _)| *x)
                    .collect(),
            ),
        }
    }

    /// Build a column from raw cells: numeric when every non-null cell is a number
    pub fn from_cells(cells: Vec<Cell>) -> Column {
        let all_numeric = cells
            .iter()
            .all(|c| matches!(c, Cell::Null | Cell::Integer(_) | Cell::Real(_)));
        let any_value = cells.iter().any(|c| !c.is_null());

        if all_numeric && any_value {
            Column::Numeric(cells.iter().map(Cell::as_f64).collect())
        } else {
            Column::Text(cells.iter().map(Cell::as_text).collect())
        }
    }
}

/// Ordered set of equally long named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    names: Vec<String>,
    columns: HashMap<String, Column>,
    rows: usize,
}

impl Frame {
    /// Create an empty frame with no columns
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty frame that will hold `rows` rows
    pub fn with_rows(rows: usize) -> Self {
        Self {
            names: Vec::new(),
            columns: HashMap::new(),
            rows,
        }
    }

    /// Build a frame from named columns
    pub fn from_columns(columns: Vec<(String, Column)>) -> Result<Self> {
        let rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let mut frame = Self::with_rows(rows);
        for (name, column) in columns {
            frame.insert(name, column)?;
        }
        Ok(frame)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.names.len()
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Borrow a numeric column
    pub fn numeric(&self, name: &str) -> Option<&[f64]> {
        match self.columns.get(name) {
            Some(Column::Numeric(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Numeric view of any column, coercing text
    pub fn numeric_values(&self, name: &str) -> Option<Vec<f64>> {
        self.columns.get(name).map(Column::to_numeric)
    }

    /// Borrow a text column
    pub fn text(&self, name: &str) -> Option<&[Option<String>]> {
        match self.columns.get(name) {
            Some(Column::Text(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Insert or replace a column; a replaced column keeps its position
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if self.names.is_empty() && self.rows == 0 {
            self.rows = column.len();
        }
        if column.len() != self.rows {
            return Err(RatioError::DataError(format!(
                "Column {} has {} rows, frame has {}",
                name,
                column.len(),
                self.rows
            )));
        }
        if !self.columns.contains_key(&name) {
            self.names.push(name.clone());
        }
        self.columns.insert(name, column);
        Ok(())
    }

    /// Insert or replace a numeric column
    pub fn insert_numeric(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        self.insert(name, Column::Numeric(values))
    }

    /// Remove a column, returning it
    pub fn remove(&mut self, name: &str) -> Option<Column> {
        let removed = self.columns.remove(name);
        if removed.is_some() {
            self.names.retain(|n| n != name);
        }
        removed
    }

    /// Keep only columns for which `keep` returns true
    pub fn retain_columns<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        let columns = &mut self.columns;
        self.names.retain(|name| {
            if keep(name) {
                true
            } else {
                columns.remove(name);
                false
            }
        });
    }

    /// Convert every column not listed in `except` to numeric
    pub fn coerce_numeric(&mut self, except: &[&str]) {
        for name in &self.names {
            if except.contains(&name.as_str()) {
                continue;
            }
            if let Some(column) = self.columns.get_mut(name) {
                if !column.is_numeric() {
                    *column = Column::Numeric(column.to_numeric());
                }
            }
        }
    }

    /// Replace ±inf with the missing sentinel in every numeric column
    pub fn replace_infinite(&mut self) {
        for column in self.columns.values_mut() {
            if let Column::Numeric(values) = column {
                for v in values.iter_mut() {
                    if v.is_infinite() {
                        *v = MISSING;
                    }
                }
            }
        }
    }

    /// Round every numeric column
    pub fn round(&mut self, decimals: u32) {
        for column in self.columns.values_mut() {
            if let Column::Numeric(values) = column {
                for v in values.iter_mut() {
                    *v = round_to(*v, decimals);
                }
            }
        }
    }

    /// New frame with only the rows where `mask` is true
    pub fn filter_rows(&self, mask: &[bool]) -> Result<Frame> {
        if mask.len() != self.rows {
            return Err(RatioError::DataError(format!(
                "Row mask has {} entries, frame has {} rows",
                mask.len(),
                self.rows
            )));
        }
        let mut out = Frame::with_rows(mask.iter().filter(|m| **m).count());
        for name in &self.names {
            out.insert(name.clone(), self.columns[name].filter(mask))?;
        }
        Ok(out)
    }

    /// New frame with the named columns in the given order
    pub fn select(&self, names: &[&str]) -> Result<Frame> {
        let mut out = Frame::with_rows(self.rows);
        for name in names {
            let column = self.columns.get(*name).ok_or_else(|| RatioError::MissingColumn {
                table: "<frame>".to_string(),
                column: name.to_string(),
            })?;
            out.insert(name.to_string(), column.clone())?;
        }
        Ok(out)
    }
}
