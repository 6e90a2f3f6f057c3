//! Standardization of the raw fact table
//!
//! Renames raw columns to their standard names and keeps only the facts whose
//! accounting term and period context are of interest.

use super::store::{copy_table, drop_table, quote_ident, rename_columns};
use crate::config::RatioConfig;
use crate::error::{RatioError, Result};
use crate::types::{COL_ACCOUNTING_TERM, COL_PERIOD};
use rusqlite::{params_from_iter, Connection};

/// Rename and filter settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StandardizeSettings {
    /// (raw name, standard name)
    pub column_mapping: Vec<(String, String)>,
    /// `LIKE` patterns matched against `AccountingTerm`; empty keeps all terms
    pub accounting_terms: Vec<String>,
    /// Exact `Period` values; empty keeps all periods
    pub periods: Vec<String>,
}

impl StandardizeSettings {
    pub fn from_config(config: &RatioConfig) -> Self {
        Self {
            column_mapping: config
                .standard_column_mapping
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            accounting_terms: config.accounting_term_conditions.clone(),
            periods: config.period_conditions.clone(),
        }
    }

    /// WHERE clause over numbered parameters, with the parameter values
    fn filter_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if !self.accounting_terms.is_empty() {
            let terms = self
                .accounting_terms
                .iter()
                .map(|pattern| {
                    params.push(pattern.clone());
                    format!("{} LIKE ?{}", quote_ident(COL_ACCOUNTING_TERM), params.len())
                })
                .collect::<Vec<_>>();
            clauses.push(format!("({})", terms.join(" OR ")));
        }
        if !self.periods.is_empty() {
            let periods = self
                .periods
                .iter()
                .map(|period| {
                    params.push(period.clone());
                    format!("{} = ?{}", quote_ident(COL_PERIOD), params.len())
                })
                .collect::<Vec<_>>();
            clauses.push(format!("({})", periods.join(" OR ")));
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), params)
        }
    }
}

/// Build `target` from `source`; returns the number of rows kept
///
/// `source` is left untouched. The working copy is dropped on every path.
pub fn standardize(
    conn: &Connection,
    source: &str,
    target: &str,
    settings: &StandardizeSettings,
) -> Result<usize> {
    let temp = format!("TempTable_{}", uuid::Uuid::new_v4().simple());
    copy_table(conn, source, &temp)?;

    let result = materialise(conn, &temp, target, settings);
    if let Err(e) = drop_table(conn, &temp) {
        log::warn!("Failed to drop working table {}: {}", temp, e);
    }
    let rows = result?;

    log::info!("Standardized {} into {} ({} rows)", source, target, rows);
    Ok(rows)
}

fn materialise(
    conn: &Connection,
    temp: &str,
    target: &str,
    settings: &StandardizeSettings,
) -> Result<usize> {
    let renamed = rename_columns(conn, temp, &settings.column_mapping)?;
    log::debug!("Renamed {} columns", renamed);

    drop_table(conn, target)?;
    let (clause, params) = settings.filter_clause();
    conn.execute(
        &format!(
            "CREATE TABLE {} AS SELECT * FROM {} WHERE 0",
            quote_ident(target),
            quote_ident(temp)
        ),
        [],
    )
    .map_err(|e| RatioError::DatabaseError(format!("Failed to create {}: {}", target, e)))?;

    let sql = format!(
        "INSERT INTO {} SELECT * FROM {}{}",
        quote_ident(target),
        quote_ident(temp),
        clause
    );
    conn.execute(&sql, params_from_iter(params.iter()))
        .map_err(|e| RatioError::DatabaseError(format!("Failed to fill {}: {}", target, e)))?;

    let rows: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(target)),
        [],
        |row| row.get(0),
    )?;
    Ok(rows as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::{table_columns, table_exists};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE raw (AccountingTerm TEXT, Period TEXT, Amount TEXT, edinet_code TEXT);
             INSERT INTO raw VALUES ('jppfs_cor:NetSales', 'CurrentYearDuration', '100', 'E1');
             INSERT INTO raw VALUES ('jppfs_cor:NetSales', 'Prior1YearDuration', '90', 'E1');
             INSERT INTO raw VALUES ('jpcrp_cor:Employees', 'CurrentYearInstant', '5', 'E1');
             INSERT INTO raw VALUES ('other:Thing', 'CurrentYearDuration', '1', 'E1');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_standardize_filters_and_renames() {
        let conn = setup();
        let settings = StandardizeSettings {
            column_mapping: vec![("edinet_code".to_string(), "edinetCode".to_string())],
            accounting_terms: vec!["jppfs_cor:%".to_string(), "jpcrp_cor:%".to_string()],
            periods: vec!["CurrentYearDuration".to_string(), "CurrentYearInstant".to_string()],
        };

        let rows = standardize(&conn, "raw", "Standard_Data", &settings).unwrap();
        assert_eq!(rows, 2);
        assert!(table_columns(&conn, "Standard_Data")
            .unwrap()
            .contains(&"edinetCode".to_string()));
        // raw table untouched
        assert!(table_columns(&conn, "raw")
            .unwrap()
            .contains(&"edinet_code".to_string()));
    }

    #[test]
    fn test_standardize_without_conditions_keeps_everything() {
        let conn = setup();
        let rows = standardize(&conn, "raw", "Standard_Data", &StandardizeSettings::default()).unwrap();
        assert_eq!(rows, 4);
    }

    #[test]
    fn test_working_table_removed() {
        let conn = setup();
        standardize(&conn, "raw", "Standard_Data", &StandardizeSettings::default()).unwrap();
        let leftovers: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE 'TempTable_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(leftovers, 0);
        assert!(table_exists(&conn, "Standard_Data").unwrap());
    }

    #[test]
    fn test_missing_source_is_error() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(standardize(&conn, "absent", "out", &StandardizeSettings::default()).is_err());
    }
}
