//! Ratio derivation: facts in, one wide ratio row per filing out
//!
//! Entities are processed one at a time. Each entity's rows are appended in
//! their own transaction, so a failing entity is logged and skipped without
//! touching rows already written for the others.

use super::catalog::RatioCatalog;
use super::pivot::pivot_facts;
use super::rolling::rolling_statistics;
use crate::config::RatioSettings;
use crate::data::store::{
    append_frame, create_table, distinct_values, drop_table, ensure_columns, quote_ident,
    read_frame, table_exists,
};
use crate::data::{Frame, PriceSource};
use crate::error::Result;
use crate::types::{parse_date, COL_EDINET_CODE, COL_PERIOD_END, MISSING, RATIO_INDEX_COLUMNS};

/// Outcome of a derivation run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivationReport {
    pub entities: usize,
    pub succeeded: usize,
    /// (entity, error message)
    pub failed: Vec<(String, String)>,
    pub rows_written: usize,
}

pub struct RatioPipeline<'a> {
    catalog: &'a RatioCatalog,
    settings: &'a RatioSettings,
    prices: Option<(&'a dyn PriceSource, String)>,
}

impl<'a> RatioPipeline<'a> {
    pub fn new(catalog: &'a RatioCatalog, settings: &'a RatioSettings) -> Self {
        Self {
            catalog,
            settings,
            prices: None,
        }
    }

    /// Merge the latest share price into `column` before ratios are evaluated
    pub fn with_prices(mut self, source: &'a dyn PriceSource, column: impl Into<String>) -> Self {
        self.prices = Some((source, column.into()));
        self
    }

    fn price_column(&self) -> Option<&str> {
        self.prices.as_ref().map(|(_, column)| column.as_str())
    }

    /// Derive the wide ratio rows of one entity from its facts
    pub fn derive_entity(&self, facts: &Frame) -> Result<Frame> {
        let mut frame = pivot_facts(facts)?;
        frame.coerce_numeric(&RATIO_INDEX_COLUMNS);

        self.resolve_mappings(&mut frame)?;
        if let Some((source, column)) = &self.prices {
            merge_prices(&mut frame, *source, column)?;
        }

        // Declaration order; later ratios may read earlier ones
        for ratio in self.catalog.ratios() {
            let values = ratio.expression.evaluate(&frame).into_column(frame.len());
            frame.insert_numeric(ratio.output.as_str(), values)?;
        }

        for name in self.catalog.ratio_names() {
            let values = frame.numeric_values(name).unwrap_or_default();
            for (statistic, column) in rolling_statistics(&values) {
                frame.insert_numeric(statistic.column_name(name), column)?;
            }
        }

        frame.round(self.settings.decimals);
        Ok(frame)
    }

    fn resolve_mappings(&self, frame: &mut Frame) -> Result<()> {
        for mapping in self.catalog.mappings() {
            let values = mapping.expression.evaluate(frame).into_column(frame.len());
            frame.insert_numeric(mapping.name.as_str(), values)?;
        }

        let consumed = self.catalog.consumed_columns();
        let outputs = self.catalog.mapping_outputs();
        let prefixes = &self.settings.drop_prefixes;
        frame.retain_columns(|name| {
            if outputs.contains(name) || RATIO_INDEX_COLUMNS.contains(&name) {
                return true;
            }
            !consumed.contains(name) && !prefixes.iter().any(|p| name.starts_with(p.as_str()))
        });
        Ok(())
    }

    /// Derive every entity of `input` and append the rows to `output`
    pub fn run(&self, conn: &rusqlite::Connection, input: &str, output: &str) -> Result<DerivationReport> {
        if self.settings.replace_existing {
            drop_table(conn, output)?;
        }
        let schema = self.catalog.output_schema(self.price_column());
        if table_exists(conn, output)? {
            ensure_columns(conn, output, &schema)?;
        } else {
            create_table(conn, output, &schema)?;
        }

        let entities = distinct_values(conn, input, COL_EDINET_CODE)?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1 ORDER BY rowid",
            quote_ident(input),
            quote_ident(COL_EDINET_CODE)
        );
        log::info!("Deriving ratios for {} entities from {}", entities.len(), input);

        let mut report = DerivationReport {
            entities: entities.len(),
            ..Default::default()
        };
        for code in &entities {
            let result = read_frame(conn, &sql, [code])
                .and_then(|facts| self.derive_entity(&facts))
                .and_then(|rows| append_frame(conn, output, &rows));
            match result {
                Ok(rows) => {
                    log::debug!("{}: wrote {} ratio rows", code, rows);
                    report.succeeded += 1;
                    report.rows_written += rows;
                }
                Err(e) => {
                    log::warn!("Skipping entity {}: {}", code, e);
                    report.failed.push((code.clone(), e.to_string()));
                }
            }
        }

        log::info!(
            "Derived {} rows for {}/{} entities into {}",
            report.rows_written,
            report.succeeded,
            report.entities,
            output
        );
        Ok(report)
    }
}

/// Attach the latest price at or before each row's period end
fn merge_prices(frame: &mut Frame, source: &dyn PriceSource, column: &str) -> Result<()> {
    let codes = frame.column(COL_EDINET_CODE).cloned();
    let ends = frame.column(COL_PERIOD_END).cloned();
    let (Some(codes), Some(ends)) = (codes, ends) else {
        return frame.insert_numeric(column, vec![MISSING; frame.len()]);
    };

    let mut prices = Vec::with_capacity(frame.len());
    for row in 0..frame.len() {
        let date = ends.text_at(row).as_deref().and_then(parse_date);
        let price = match (codes.text_at(row), date) {
            (Some(code), Some(date)) => source.latest_price(&code, date)?.unwrap_or(MISSING),
            _ => MISSING,
        };
        prices.push(price);
    }
    frame.insert_numeric(column, prices)
}
