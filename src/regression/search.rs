//! Significant-predictor search
//!
//! Every ordered pair of eligible columns gets a single-variable regression.
//! Results are ranked by explanatory power, summarised to a text file and
//! appended to a results table tagged with the run that produced them.

use super::report::write_text;
use super::runner::ModelRunner;
use crate::config::WinsorizeLimits;
use crate::data::frame::Column;
use crate::data::store::{append_frame, quote_ident, table_columns};
use crate::data::Frame;
use crate::error::{RatioError, Result};
use crate::types::is_identifier_column;
use chrono::Utc;
use rusqlite::Connection;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// R² values closer than this rank as equal and fall back to p-value
const R_SQUARED_TOLERANCE: f64 = 1e-12;

/// Number of top results listed in the summary file
const SUMMARY_TOP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Success,
    Failed,
}

impl FitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitStatus::Success => "success",
            FitStatus::Failed => "failed",
        }
    }
}

/// One single-variable regression of the sweep
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionResult {
    pub dep_var: String,
    pub ind_var: String,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub n_obs: usize,
    pub coef: f64,
    pub p_value: f64,
    pub is_significant: bool,
    pub status: FitStatus,
    /// 1-based; `None` for failed fits
    pub rank: Option<usize>,
}

impl RegressionResult {
    pub fn is_success(&self) -> bool {
        self.status == FitStatus::Success
    }
}

/// Outcome of one search run
#[derive(Debug, Clone)]
pub struct SearchSummary {
    pub run_id: String,
    pub table: String,
    pub alpha: f64,
    /// Ranked successes first, then failures
    pub results: Vec<RegressionResult>,
    pub rows_written: usize,
}

impl SearchSummary {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn significant(&self) -> usize {
        self.results.iter().filter(|r| r.is_significant).count()
    }
}

/// Significance stars for a p-value
pub fn significance_stars(p_value: f64) -> &'static str {
    if p_value < 0.001 {
        "***"
    } else if p_value < 0.01 {
        "**"
    } else if p_value < 0.05 {
        "*"
    } else {
        ""
    }
}

/// Columns of `table` that may enter a model
pub fn eligible_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    Ok(table_columns(conn, table)?
        .into_iter()
        .filter(|c| !is_identifier_column(c))
        .collect())
}

/// Intersect the allow-list with eligible columns; an empty list selects all
pub fn resolve_dependents(eligible: &[String], requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        return eligible.to_vec();
    }
    let mut resolved = Vec::new();
    for name in requested {
        match eligible.iter().find(|c| c.eq_ignore_ascii_case(name)) {
            Some(column) if !resolved.contains(column) => resolved.push(column.clone()),
            Some(_) => {}
            None => log::warn!("Dependent variable {} is not an eligible column, skipping", name),
        }
    }
    resolved
}

/// Sort successes by R² descending then p-value ascending, assign ranks, failures last
///
/// Successes whose R² lies within tolerance of the first member of their run
/// are ordered among themselves by p-value.
pub fn rank_results(results: Vec<RegressionResult>) -> Vec<RegressionResult> {
    let (mut successes, mut failures): (Vec<_>, Vec<_>) =
        results.into_iter().partition(RegressionResult::is_success);

    successes.sort_by(|a, b| b.r_squared.total_cmp(&a.r_squared));
    let mut start = 0;
    while start < successes.len() {
        let anchor = successes[start].r_squared;
        let end = start
            + successes[start..]
                .iter()
                .take_while(|r| (anchor - r.r_squared).abs() <= R_SQUARED_TOLERANCE)
                .count();
        successes[start..end].sort_by(|a, b| a.p_value.total_cmp(&b.p_value));
        start = end.max(start + 1);
    }

    for (i, result) in successes.iter_mut().enumerate() {
        result.rank = Some(i + 1);
    }
    for result in failures.iter_mut() {
        result.rank = None;
    }
    successes.append(&mut failures);
    successes
}

/// Regress `dependent` on `independent` through the runner
pub fn run_pair(
    runner: &ModelRunner<'_>,
    table: &str,
    dependent: &str,
    independent: &str,
    alpha: f64,
) -> RegressionResult {
    let query = format!(
        "SELECT {}, {} FROM {}",
        quote_ident(dependent),
        quote_ident(independent),
        quote_ident(table)
    );
    let model = runner.fit(&query, dependent, &[independent.to_string()]);
    let (coef, p_value) = model
        .results()
        .and_then(|r| r.coefficient(independent))
        .map(|c| (c.estimate, c.p_value))
        .unwrap_or((f64::NAN, f64::NAN));
    let status = if model.nobs() > 0 {
        FitStatus::Success
    } else {
        FitStatus::Failed
    };

    RegressionResult {
        dep_var: dependent.to_string(),
        ind_var: independent.to_string(),
        r_squared: model.rsquared(),
        adj_r_squared: model.rsquared_adj(),
        n_obs: model.nobs(),
        coef,
        p_value,
        is_significant: status == FitStatus::Success && p_value < alpha,
        status,
        rank: None,
    }
}

/// Sweep every ordered pair and rank the results; nothing is persisted
pub fn sweep(
    conn: &Connection,
    table: &str,
    limits: WinsorizeLimits,
    alpha: f64,
    dependent_variables: &[String],
) -> Result<Vec<RegressionResult>> {
    let eligible = eligible_columns(conn, table)?;
    let dependents = resolve_dependents(&eligible, dependent_variables);
    log::info!(
        "Searching {} dependent x {} candidate columns in {}",
        dependents.len(),
        eligible.len(),
        table
    );

    let runner = ModelRunner::new(conn).with_limits(limits);
    let mut results = Vec::with_capacity(dependents.len() * eligible.len().saturating_sub(1));
    for dependent in &dependents {
        for independent in eligible.iter().filter(|c| *c != dependent) {
            let result = run_pair(&runner, table, dependent, independent, alpha);
            if !result.is_success() {
                log::debug!("No fit for {} ~ {}", dependent, independent);
            }
            results.push(result);
        }
    }
    Ok(rank_results(results))
}

/// Text summary of a search run
pub fn render_search_summary(summary: &SearchSummary, results_table: &str) -> String {
    SearchSummaryText {
        summary,
        results_table,
    }
    .to_string()
}

struct SearchSummaryText<'a> {
    summary: &'a SearchSummary,
    results_table: &'a str,
}

impl fmt::Display for SearchSummaryText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary;
        writeln!(f, "--- Predictor Search Summary ---")?;
        writeln!(f, "Run: {}", summary.run_id)?;
        writeln!(f, "Table: {}", summary.table)?;
        writeln!(f, "Significance level (alpha): {}", summary.alpha)?;
        writeln!(f, "Total regressions: {}", summary.total())?;
        writeln!(f, "Successful regressions: {}", summary.successful())?;
        writeln!(f, "Significant predictors: {}", summary.significant())?;
        writeln!(f, "Results table: {}", self.results_table)?;
        writeln!(f)?;

        writeln!(f, "--- Top Significant Predictors ---")?;
        let top: Vec<&RegressionResult> = summary
            .results
            .iter()
            .filter(|r| r.is_significant)
            .take(SUMMARY_TOP)
            .collect();
        if top.is_empty() {
            writeln!(f, "No predictors are significant at this level.")?;
        }
        for r in top {
            writeln!(
                f,
                "{:>4}. {} ~ {}: R2={:.4} coef={:.4} p={:.4}{}",
                r.rank.unwrap_or_default(),
                r.dep_var,
                r.ind_var,
                r.r_squared,
                r.coef,
                r.p_value,
                significance_stars(r.p_value)
            )?;
        }
        Ok(())
    }
}

/// Successful results as rows of the results table
fn results_frame(summary: &SearchSummary, run_at: &str) -> Result<Frame> {
    let successes: Vec<&RegressionResult> =
        summary.results.iter().filter(|r| r.is_success()).collect();
    let text = |values: Vec<String>| Column::Text(values.into_iter().map(Some).collect());
    let numbers = |values: Vec<f64>| Column::Numeric(values);

    Frame::from_columns(vec![
        ("run_id".to_string(), text(vec![summary.run_id.clone(); successes.len()])),
        ("run_at".to_string(), text(vec![run_at.to_string(); successes.len()])),
        (
            "rank".to_string(),
            numbers(successes.iter().map(|r| r.rank.map(|v| v as f64).unwrap_or(f64::NAN)).collect()),
        ),
        ("dep_var".to_string(), text(successes.iter().map(|r| r.dep_var.clone()).collect())),
        ("ind_var".to_string(), text(successes.iter().map(|r| r.ind_var.clone()).collect())),
        ("r_squared".to_string(), numbers(successes.iter().map(|r| r.r_squared).collect())),
        ("adj_r_squared".to_string(), numbers(successes.iter().map(|r| r.adj_r_squared).collect())),
        ("n_obs".to_string(), numbers(successes.iter().map(|r| r.n_obs as f64).collect())),
        ("coef".to_string(), numbers(successes.iter().map(|r| r.coef).collect())),
        ("p_value".to_string(), numbers(successes.iter().map(|r| r.p_value).collect())),
        (
            "significance".to_string(),
            text(successes.iter().map(|r| significance_stars(r.p_value).to_string()).collect()),
        ),
        (
            "is_significant".to_string(),
            numbers(successes.iter().map(|r| if r.is_significant { 1.0 } else { 0.0 }).collect()),
        ),
    ])
}

/// Run the full search: sweep, rank, write the summary file and append results
pub fn search(
    conn: &Connection,
    table: &str,
    results_table: &str,
    output_file: &Path,
    limits: WinsorizeLimits,
    alpha: f64,
    dependent_variables: &[String],
) -> Result<SearchSummary> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(RatioError::ConfigError(format!("alpha must lie in (0, 1), got {}", alpha)));
    }
    limits.validate()?;

    let results = sweep(conn, table, limits, alpha, dependent_variables)?;
    let mut summary = SearchSummary {
        run_id: Uuid::new_v4().to_string(),
        table: table.to_string(),
        alpha,
        results,
        rows_written: 0,
    };

    let run_at = Utc::now().to_rfc3339();
    let frame = results_frame(&summary, &run_at)?;
    if !frame.is_empty() {
        summary.rows_written = append_frame(conn, results_table, &frame)?;
    }
    write_text(output_file, &render_search_summary(&summary, results_table))?;

    log::info!(
        "Predictor search over {}: {} regressions, {} successful, {} significant",
        table,
        summary.total(),
        summary.successful(),
        summary.significant()
    );
    Ok(summary)
}
