//! SQLite persistence helpers
//!
//! Thin wrappers around `rusqlite` for the handful of table operations the
//! pipelines need: schema inspection, reading a query into a [`Frame`],
//! appending a frame with schema widening, and a few table utilities.

use super::frame::{Cell, Column, Frame};
use crate::error::{RatioError, Result};
use crate::types::TaggedFact;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Params};
use std::path::Path;

/// Declared SQLite column affinity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Real,
    Integer,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Real => "REAL",
            SqlType::Integer => "INTEGER",
        }
    }

    fn of(column: &Column) -> Self {
        if column.is_numeric() {
            SqlType::Real
        } else {
            SqlType::Text
        }
    }
}

/// Quote an identifier for interpolation into SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Open (or create) a database file
pub fn open(path: &Path) -> Result<Connection> {
    Connection::open(path).map_err(|e| {
        RatioError::DatabaseError(format!("Failed to open database {}: {}", path.display(), e))
    })
}

/// True when `table` exists
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Column names of `table` in declaration order
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(RatioError::DatabaseError(format!("Table not found: {}", table)));
    }
    Ok(columns)
}

/// Run a query and collect the result set into a frame
pub fn read_frame<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Frame> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); names.len()];

    let mut rows = stmt.query(params)?;
    while let Some(row) = rows.next()? {
        for (i, column) in cells.iter_mut().enumerate() {
            let value: Value = row.get(i)?;
            column.push(Cell::from(value));
        }
    }

    let row_count = cells.first().map(Vec::len).unwrap_or(0);
    let mut frame = Frame::with_rows(row_count);
    for (name, column) in names.into_iter().zip(cells) {
        frame.insert(name, Column::from_cells(column))?;
    }
    Ok(frame)
}

/// Distinct non-null values of `column`, sorted
pub fn distinct_values(conn: &Connection, table: &str, column: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY {col}",
        col = quote_ident(column),
        table = quote_ident(table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let values = stmt
        .query_map([], |row| {
            let value: Value = row.get(0)?;
            Ok(Cell::from(value).as_text().unwrap_or_default())
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(values)
}

/// Create `table` if it does not exist
pub fn create_table(conn: &Connection, table: &str, columns: &[(String, SqlType)]) -> Result<()> {
    if columns.is_empty() {
        return Err(RatioError::DatabaseError(format!(
            "Cannot create table {} without columns",
            table
        )));
    }
    let definitions = columns
        .iter()
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.as_sql()))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        &format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(table), definitions),
        [],
    )
    .map_err(|e| RatioError::DatabaseError(format!("Failed to create table {}: {}", table, e)))?;
    Ok(())
}

/// Add any of `columns` the table lacks; returns how many were added
///
/// Not safe to run concurrently against the same table.
pub fn ensure_columns(conn: &Connection, table: &str, columns: &[(String, SqlType)]) -> Result<usize> {
    let existing = table_columns(conn, table)?;
    let mut added = 0;
    for (name, ty) in columns {
        if existing.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            continue;
        }
        conn.execute(
            &format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(table),
                quote_ident(name),
                ty.as_sql()
            ),
            [],
        )
        .map_err(|e| {
            RatioError::DatabaseError(format!("Failed to add column {} to {}: {}", name, table, e))
        })?;
        log::debug!("Added column {} to {}", name, table);
        added += 1;
    }
    Ok(added)
}

/// Schema of a frame as (name, type) pairs
pub fn frame_schema(frame: &Frame) -> Vec<(String, SqlType)> {
    frame
        .column_names()
        .iter()
        .filter_map(|name| frame.column(name).map(|c| (name.clone(), SqlType::of(c))))
        .collect()
}

/// Append every row of `frame` to `table`, creating or widening it first
///
/// All rows are written in one transaction.
pub fn append_frame(conn: &Connection, table: &str, frame: &Frame) -> Result<usize> {
    if frame.width() == 0 {
        return Ok(0);
    }
    let schema = frame_schema(frame);
    if table_exists(conn, table)? {
        ensure_columns(conn, table, &schema)?;
    } else {
        create_table(conn, table, &schema)?;
    }

    let names = frame.column_names();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", "),
        (1..=names.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
    );

    let columns: Vec<&Column> = names.iter().filter_map(|n| frame.column(n)).collect();
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(&sql)?;
        for row in 0..frame.len() {
            stmt.execute(params_from_iter(columns.iter().map(|c| c.sql_value(row))))?;
        }
    }
    tx.commit()?;
    Ok(frame.len())
}

/// Drop `table` and write `frame` in its place
pub fn replace_table(conn: &Connection, table: &str, frame: &Frame) -> Result<usize> {
    drop_table(conn, table)?;
    append_frame(conn, table, frame)
}

/// Drop `table` if it exists
pub fn drop_table(conn: &Connection, table: &str) -> Result<()> {
    conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)), [])
        .map_err(|e| RatioError::DatabaseError(format!("Failed to drop table {}: {}", table, e)))?;
    Ok(())
}

/// Materialise a copy of `source` as `target`
pub fn copy_table(conn: &Connection, source: &str, target: &str) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE {} AS SELECT * FROM {}",
            quote_ident(target),
            quote_ident(source)
        ),
        [],
    )
    .map_err(|e| {
        RatioError::DatabaseError(format!("Failed to copy {} to {}: {}", source, target, e))
    })?;
    Ok(())
}

/// Rename columns of `table`; pairs whose source column is absent are skipped
pub fn rename_columns(conn: &Connection, table: &str, mapping: &[(String, String)]) -> Result<usize> {
    let existing = table_columns(conn, table)?;
    let mut renamed = 0;
    for (old, new) in mapping {
        if !existing.iter().any(|c| c == old) {
            log::debug!("Column {} not present in {}, not renamed", old, table);
            continue;
        }
        conn.execute(
            &format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quote_ident(table),
                quote_ident(old),
                quote_ident(new)
            ),
            [],
        )
        .map_err(|e| {
            RatioError::DatabaseError(format!("Failed to rename {} in {}: {}", old, table, e))
        })?;
        renamed += 1;
    }
    Ok(renamed)
}

/// Insert tagged facts into `table`, creating it when missing
pub fn insert_facts(conn: &Connection, table: &str, facts: &[TaggedFact]) -> Result<usize> {
    let schema: Vec<(String, SqlType)> = TaggedFact::COLUMNS
        .iter()
        .map(|c| (c.to_string(), SqlType::Text))
        .collect();
    create_table(conn, table, &schema)?;

    let sql = format!(
        "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        quote_ident(table),
        TaggedFact::COLUMNS
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(&sql)?;
        for fact in facts {
            stmt.execute(rusqlite::params![
                &fact.accounting_term,
                &fact.period,
                &fact.currency,
                &fact.amount,
                &fact.doc_id,
                &fact.edinet_code,
                &fact.doc_type_code,
                &fact.submit_date_time,
                &fact.period_start,
                &fact.period_end,
            ])?;
        }
    }
    tx.commit()?;
    Ok(facts.len())
}

/// Dump `SELECT * FROM table [modifier]` to a CSV file
///
/// `modifier` is appended verbatim (e.g. a join or where clause).
pub fn export_csv(conn: &Connection, table: &str, path: &Path, modifier: Option<&str>) -> Result<usize> {
    let sql = format!(
        "SELECT * FROM {} {}",
        quote_ident(table),
        modifier.unwrap_or_default()
    );
    let frame = read_frame(conn, &sql, [])?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(frame.column_names())?;
    for row in 0..frame.len() {
        let record: Vec<String> = frame
            .column_names()
            .iter()
            .map(|name| {
                frame
                    .column(name)
                    .and_then(|c| c.text_at(row))
                    .unwrap_or_default()
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(frame.len())
}
