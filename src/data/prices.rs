//! Share price lookup for per-share ratios

use super::frame::Cell;
use super::store::quote_ident;
use crate::error::Result;
use chrono::NaiveDate;
use hashbrown::HashMap;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use std::cell::RefCell;

/// Source of the latest known share price of an entity
pub trait PriceSource {
    /// Most recent price on or before `as_of`, `None` when nothing is recorded
    fn latest_price(&self, edinet_code: &str, as_of: NaiveDate) -> Result<Option<f64>>;
}

/// Prices from a `stock_prices` table joined to a company table mapping tickers to EDINET codes
///
/// Expected columns: `stock_prices(Date, Ticker, Price)` and
/// `companyInfo(EdinetCode, Company_Ticker)`.
pub struct SqlitePriceSource<'a> {
    conn: &'a Connection,
    sql: String,
    cache: RefCell<HashMap<(String, NaiveDate), Option<f64>>>,
}

impl<'a> SqlitePriceSource<'a> {
    pub fn new(conn: &'a Connection, prices_table: &str, companies_table: &str) -> Self {
        let sql = format!(
            "SELECT s.Price FROM {prices} s \
             JOIN {companies} c ON c.Company_Ticker = s.Ticker \
             WHERE c.EdinetCode = ?1 AND substr(s.Date, 1, 10) <= ?2 \
             ORDER BY s.Date DESC LIMIT 1",
            prices = quote_ident(prices_table),
            companies = quote_ident(companies_table),
        );
        Self {
            conn,
            sql,
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl PriceSource for SqlitePriceSource<'_> {
    fn latest_price(&self, edinet_code: &str, as_of: NaiveDate) -> Result<Option<f64>> {
        let key = (edinet_code.to_string(), as_of);
        if let Some(price) = self.cache.borrow().get(&key) {
            return Ok(*price);
        }

        let value: Option<Value> = self
            .conn
            .query_row(
                &self.sql,
                rusqlite::params![edinet_code, as_of.format("%Y-%m-%d").to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let price = value
            .map(|v| Cell::from(v).as_f64())
            .filter(|p| p.is_finite());
        self.cache.borrow_mut().insert(key, price);
        Ok(price)
    }
}

/// Fixed prices keyed by entity, mostly for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct StaticPriceSource {
    prices: HashMap<String, Vec<(NaiveDate, f64)>>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a price observation
    pub fn add(&mut self, edinet_code: &str, date: NaiveDate, price: f64) {
        let series = self.prices.entry(edinet_code.to_string()).or_default();
        series.push((date, price));
        series.sort_by_key(|(d, _)| *d);
    }
}

impl PriceSource for StaticPriceSource {
    fn latest_price(&self, edinet_code: &str, as_of: NaiveDate) -> Result<Option<f64>> {
        Ok(self.prices.get(edinet_code).and_then(|series| {
            series
                .iter()
                .rev()
                .find(|(d, _)| *d <= as_of)
                .map(|(_, p)| *p)
        }))
    }
}
