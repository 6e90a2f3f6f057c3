//! Regression model runner: query, clean, trim outlier rows, fit
//!
//! The runner never returns an error. Every failure becomes
//! [`FittedModel::Empty`] so callers sweeping many models can read the same
//! accessors off every result.

use super::ols::{fit_ols, FitError, FittedModel};
use crate::config::WinsorizeLimits;
use crate::data::store::read_frame;
use crate::data::Frame;
use crate::types::{is_identifier_column, is_missing};
use rusqlite::Connection;

/// Quantile with linear interpolation between order statistics; `sorted` must be ascending
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let position = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let weight = position - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

/// Rows whose every listed column lies inside its `[lower, upper]` quantile band
///
/// This excludes whole rows rather than clamping values. Missing values
/// never pass the band.
pub fn winsorize_mask(columns: &[Vec<f64>], limits: WinsorizeLimits) -> Vec<bool> {
    let rows = columns.first().map(Vec::len).unwrap_or(0);
    let mut keep = vec![true; rows];
    if limits.is_keep_all() {
        return keep;
    }

    for values in columns {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !is_missing(*v)).collect();
        sorted.sort_by(f64::total_cmp);
        let low = quantile(&sorted, limits.lower);
        let high = quantile(&sorted, limits.upper);
        for (flag, v) in keep.iter_mut().zip(values) {
            *flag = *flag && *v >= low && *v <= high;
        }
    }
    keep
}

/// Clean `frame` and fit `dependent ~ const + independents`
pub fn fit_frame(
    frame: &Frame,
    dependent: &str,
    independents: &[String],
    limits: WinsorizeLimits,
) -> FittedModel {
    fit_cleaned(frame, dependent, independents, limits).into()
}

fn fit_cleaned(
    frame: &Frame,
    dependent: &str,
    independents: &[String],
    limits: WinsorizeLimits,
) -> Result<super::ols::OlsResults, FitError> {
    let names: Vec<&str> = std::iter::once(dependent)
        .chain(independents.iter().map(String::as_str))
        .collect();

    let mut columns = Vec::with_capacity(names.len());
    for name in &names {
        let mut values = frame
            .numeric_values(name)
            .ok_or_else(|| FitError::MissingColumn(name.to_string()))?;
        for v in values.iter_mut() {
            if v.is_infinite() {
                *v = f64::NAN;
            }
        }
        columns.push(values);
    }

    // Drop rows missing any model variable
    let complete: Vec<bool> = (0..frame.len())
        .map(|row| columns.iter().all(|c| !is_missing(c[row])))
        .collect();
    let columns: Vec<Vec<f64>> = columns
        .into_iter()
        .map(|c| c.into_iter().zip(&complete).filter(|(_, k)| **k).map(|(v, _)| v).collect())
        .collect();

    let keep = winsorize_mask(&columns, limits);
    let mut columns = columns
        .into_iter()
        .map(|c| c.into_iter().zip(&keep).filter(|(_, k)| **k).map(|(v, _)| v).collect::<Vec<f64>>());

    let y = columns.next().unwrap_or_default();
    let regressors: Vec<(String, Vec<f64>)> = independents.iter().cloned().zip(columns).collect();
    log::debug!(
        "Fitting {} on {} regressors with {} rows",
        dependent,
        regressors.len(),
        y.len()
    );
    fit_ols(dependent, &y, &regressors)
}

/// Runs queries against one connection and fits them
pub struct ModelRunner<'a> {
    conn: &'a Connection,
    limits: WinsorizeLimits,
}

impl<'a> ModelRunner<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            limits: WinsorizeLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: WinsorizeLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Execute `query` and fit the named columns; failures give an empty model
    pub fn fit(&self, query: &str, dependent: &str, independents: &[String]) -> FittedModel {
        let frame = match read_frame(self.conn, query, []) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Regression query failed: {}", e);
                return FittedModel::Empty(FitError::Query(e.to_string()));
            }
        };
        let model = fit_frame(&frame, dependent, independents, self.limits);
        if let FittedModel::Empty(e) = &model {
            log::debug!("No fit for {} ~ {:?}: {}", dependent, independents, e);
        }
        model
    }

    /// Fit a query whose first non-identifier column is the dependent variable and the rest regressors
    pub fn fit_query(&self, query: &str) -> (String, Vec<String>, FittedModel) {
        let frame = match read_frame(self.conn, query, []) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Regression query failed: {}", e);
                return (String::new(), Vec::new(), FittedModel::Empty(FitError::Query(e.to_string())));
            }
        };
        let mut names = frame
            .column_names()
            .iter()
            .filter(|c| !is_identifier_column(c))
            .cloned();
        let Some(dependent) = names.next() else {
            return (String::new(), Vec::new(), FittedModel::Empty(FitError::EmptyDataset));
        };
        let independents: Vec<String> = names.collect();
        let model = fit_frame(&frame, &dependent, &independents, self.limits);
        (dependent, independents, model)
    }
}

/// Execute and fit in one call with the given limits
pub fn run_model(
    conn: &Connection,
    query: &str,
    dependent: &str,
    independents: &[String],
    limits: WinsorizeLimits,
) -> FittedModel {
    ModelRunner::new(conn).with_limits(limits).fit(query, dependent, independents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quantile_linear() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.0), 1.0);
        assert_eq!(quantile(&sorted, 1.0), 4.0);
        assert_relative_eq!(quantile(&sorted, 0.5), 2.5);
        assert_relative_eq!(quantile(&sorted, 0.1), 1.3, epsilon = 1e-12);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_winsorize_keep_all() {
        let columns = vec![vec![1.0, 100.0, -50.0], vec![0.0, 0.0, 1e9]];
        assert_eq!(winsorize_mask(&columns, WinsorizeLimits::keep_all()), vec![true; 3]);
    }

    #[test]
    fn test_winsorize_is_joint() {
        // 21 rows: x bands to [1, 19], y bands to [2, 40]
        let mut x: Vec<f64> = (0..21).map(|i| i as f64).collect();
        let mut y: Vec<f64> = (0..21).map(|i| (i as f64) * 2.0).collect();
        x[0] = -1000.0;
        y[10] = 1e6;
        let keep = winsorize_mask(&[x, y], WinsorizeLimits { lower: 0.05, upper: 0.95 });
        assert!(!keep[0]);
        assert!(!keep[10]);
        assert!(!keep[20]);
        assert_eq!(keep.iter().filter(|k| **k).count(), 18);
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (edinetCode TEXT, periodStart TEXT, y REAL, x REAL, bad REAL);
             INSERT INTO t VALUES ('E1', '2020-04-01', 2.1, 1.0, 1.0);
             INSERT INTO t VALUES ('E1', '2021-04-01', 3.9, 2.0, 1.0);
             INSERT INTO t VALUES ('E2', '2020-04-01', 6.2, 3.0, 1.0);
             INSERT INTO t VALUES ('E2', '2021-04-01', 7.8, 4.0, 1.0);
             INSERT INTO t VALUES ('E3', '2020-04-01', 10.1, 5.0, 1.0);
             INSERT INTO t VALUES ('E3', '2021-04-01', NULL, 6.0, 1.0);
             INSERT INTO t VALUES ('E4', '2020-04-01', 1e308 * 10, 7.0, 1.0);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_run_model_drops_missing_and_infinite() {
        let conn = setup();
        let model = run_model(
            &conn,
            "SELECT * FROM t",
            "y",
            &["x".to_string()],
            WinsorizeLimits::keep_all(),
        );
        assert_eq!(model.nobs(), 5);
        assert_relative_eq!(model.results().unwrap().coef("x").unwrap(), 1.99, epsilon = 1e-10);
    }

    #[test]
    fn test_failures_are_empty_models() {
        let conn = setup();
        let runner = ModelRunner::new(&conn);

        let bad_sql = runner.fit("SELECT * FROM missing_table", "y", &["x".to_string()]);
        assert!(matches!(bad_sql, FittedModel::Empty(FitError::Query(_))));

        let singular = runner.fit("SELECT * FROM t", "y", &["bad".to_string()]);
        assert_eq!(singular.nobs(), 0);

        let unknown = runner.fit("SELECT * FROM t", "y", &["nope".to_string()]);
        assert!(matches!(unknown, FittedModel::Empty(FitError::MissingColumn(_))));
    }

    #[test]
    fn test_fit_query_infers_columns() {
        let conn = setup();
        let runner = ModelRunner::new(&conn).with_limits(WinsorizeLimits::keep_all());
        let (dependent, independents, model) =
            runner.fit_query("SELECT edinetCode, periodStart, y, x FROM t");
        assert_eq!(dependent, "y");
        assert_eq!(independents, vec!["x".to_string()]);
        assert!(model.is_fitted());
    }
}
