//! Per-entity aggregation of the ratio table
//!
//! The input is read in pages ordered by entity and period start. Every
//! statistic is kept in a running accumulator, so an entity that spans a page
//! boundary is simply carried over and still yields exactly one output row.

use crate::config::AggregationSettings;
use crate::data::store::{append_frame, quote_ident, read_frame, replace_table, table_columns};
use crate::data::{Column, Frame};
use crate::error::{RatioError, Result};
use crate::types::{
    finite_or_missing, parse_date, COL_EDINET_CODE, COL_PERIOD_END, COL_PERIOD_START, MISSING,
};
use chrono::NaiveDate;

/// Column counting the filings behind an aggregated row
pub const PERIOD_COUNT_COLUMN: &str = "number_of_Periods";

/// Outcome of an aggregation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationReport {
    pub pages: usize,
    pub rows_read: usize,
    pub entities: usize,
}

/// Annualised growth `(last / first)^(1 / years) - 1` with `years = days / 365.0`
///
/// Undefined inputs (non-positive span, zero base, negative ratio) give missing.
pub fn annualized_growth(first: f64, last: f64, days: i64) -> f64 {
    if days <= 0 || first == 0.0 {
        return MISSING;
    }
    let years = days as f64 / 365.0;
    finite_or_missing((last / first).powf(1.0 / years) - 1.0)
}

/// Running mean and sample variance (Welford)
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Moments {
    fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            MISSING
        } else {
            self.mean
        }
    }

    fn std(&self) -> f64 {
        if self.count < 2 {
            MISSING
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// First and last dated observation
#[derive(Debug, Clone, Copy, Default)]
struct Endpoints {
    first: Option<(NaiveDate, f64)>,
    last: Option<(NaiveDate, f64)>,
}

impl Endpoints {
    fn push(&mut self, date: Option<NaiveDate>, value: f64) {
        let Some(date) = date else { return };
        if !value.is_finite() {
            return;
        }
        if self.first.is_none() {
            self.first = Some((date, value));
        }
        self.last = Some((date, value));
    }

    fn growth(&self) -> f64 {
        match (self.first, self.last) {
            (Some((d0, v0)), Some((d1, v1))) => annualized_growth(v0, v1, (d1 - d0).num_days()),
            _ => MISSING,
        }
    }
}

/// Value with the greatest period end seen so far
#[derive(Debug, Clone, Default)]
struct Latest {
    period_end: Option<String>,
    value: f64,
}

impl Latest {
    fn push(&mut self, period_end: Option<&str>, value: f64) {
        let Some(end) = period_end else { return };
        if !value.is_finite() {
            return;
        }
        if self.period_end.as_deref().map_or(true, |current| end >= current) {
            self.period_end = Some(end.to_string());
            self.value = value;
        }
    }

    fn value(&self) -> f64 {
        if self.period_end.is_some() {
            self.value
        } else {
            MISSING
        }
    }
}

/// Columns of the input grouped by naming convention
#[derive(Debug, Clone, Default)]
struct ColumnGroups {
    ratios: Vec<String>,
    per_unit: Vec<String>,
    market: Vec<String>,
}

impl ColumnGroups {
    fn classify(columns: &[String], settings: &AggregationSettings) -> Self {
        let mut groups = ColumnGroups::default();
        for column in columns {
            if column.starts_with(&settings.ratio_prefix) {
                groups.ratios.push(column.clone());
            } else if column.starts_with(&settings.per_unit_prefix) {
                groups.per_unit.push(column.clone());
            } else if column.starts_with(&settings.market_value_prefix) {
                groups.market.push(column.clone());
            }
        }
        groups
    }

    fn all(&self) -> impl Iterator<Item = &String> {
        self.ratios.iter().chain(&self.per_unit).chain(&self.market)
    }
}

#[derive(Debug, Clone)]
struct EntityAccumulator {
    code: String,
    periods: usize,
    ratios: Vec<Moments>,
    per_unit: Vec<Moments>,
    growth: Vec<Endpoints>,
    market: Vec<Latest>,
}

impl EntityAccumulator {
    fn new(code: String, groups: &ColumnGroups) -> Self {
        Self {
            code,
            periods: 0,
            ratios: vec![Moments::default(); groups.ratios.len()],
            per_unit: vec![Moments::default(); groups.per_unit.len()],
            growth: vec![Endpoints::default(); groups.per_unit.len()],
            market: vec![Latest::default(); groups.market.len()],
        }
    }
}

/// One page of input, split into the groups' numeric columns
struct Page {
    codes: Vec<Option<String>>,
    starts: Vec<Option<NaiveDate>>,
    ends: Vec<Option<String>>,
    ratios: Vec<Vec<f64>>,
    per_unit: Vec<Vec<f64>>,
    market: Vec<Vec<f64>>,
}

impl Page {
    fn from_frame(frame: &Frame, groups: &ColumnGroups) -> Self {
        let text = |name: &str| -> Vec<Option<String>> {
            (0..frame.len())
                .map(|row| frame.column(name).and_then(|c| c.text_at(row)))
                .collect()
        };
        let numeric = |names: &[String]| -> Vec<Vec<f64>> {
            names
                .iter()
                .map(|n| frame.numeric_values(n).unwrap_or_else(|| vec![MISSING; frame.len()]))
                .collect()
        };
        Self {
            codes: text(COL_EDINET_CODE),
            starts: text(COL_PERIOD_START)
                .iter()
                .map(|s| s.as_deref().and_then(parse_date))
                .collect(),
            ends: text(COL_PERIOD_END),
            ratios: numeric(&groups.ratios),
            per_unit: numeric(&groups.per_unit),
            market: numeric(&groups.market),
        }
    }

    fn accumulate(&self, row: usize, acc: &mut EntityAccumulator) {
        acc.periods += 1;
        for (moments, values) in acc.ratios.iter_mut().zip(&self.ratios) {
            moments.push(values[row]);
        }
        for (i, values) in self.per_unit.iter().enumerate() {
            acc.per_unit[i].push(values[row]);
            acc.growth[i].push(self.starts[row], values[row]);
        }
        for (latest, values) in acc.market.iter_mut().zip(&self.market) {
            latest.push(self.ends[row].as_deref(), values[row]);
        }
    }
}

/// Collapse `input` into one row per entity in `output`
///
/// The output table is replaced by the first page written; later pages append.
pub fn aggregate_ratios(
    conn: &rusqlite::Connection,
    input: &str,
    output: &str,
    settings: &AggregationSettings,
) -> Result<AggregationReport> {
    let columns = table_columns(conn, input)?;
    let groups = ColumnGroups::classify(&columns, settings);
    if groups.ratios.is_empty() {
        return Err(RatioError::DataError(format!(
            "No columns with prefix '{}' in {}",
            settings.ratio_prefix, input
        )));
    }

    let selected = [COL_EDINET_CODE, COL_PERIOD_START, COL_PERIOD_END]
        .into_iter()
        .map(quote_ident)
        .chain(groups.all().map(|c| quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM {} WHERE {code} IS NOT NULL ORDER BY {code}, {start}, rowid LIMIT ?1 OFFSET ?2",
        selected,
        quote_ident(input),
        code = quote_ident(COL_EDINET_CODE),
        start = quote_ident(COL_PERIOD_START),
    );

    let mut report = AggregationReport::default();
    let mut current: Option<EntityAccumulator> = None;
    let mut written_any = false;
    let mut offset = 0usize;

    loop {
        let frame = read_frame(conn, &sql, rusqlite::params![settings.chunk_size as i64, offset as i64])?;
        if frame.is_empty() {
            break;
        }
        report.pages += 1;
        report.rows_read += frame.len();
        offset += frame.len();

        let page = Page::from_frame(&frame, &groups);
        let mut completed = Vec::new();
        for row in 0..frame.len() {
            let Some(code) = page.codes[row].as_deref() else { continue };
            if current.as_ref().map_or(true, |acc| acc.code != code) {
                if let Some(done) = current.take() {
                    completed.push(done);
                }
                current = Some(EntityAccumulator::new(code.to_string(), &groups));
            }
            if let Some(acc) = current.as_mut() {
                page.accumulate(row, acc);
            }
        }

        if !completed.is_empty() {
            report.entities += completed.len();
            write_entities(conn, output, &groups, settings, &completed, &mut written_any)?;
            log::debug!("Page {}: {} entities complete", report.pages, completed.len());
        }
    }

    if let Some(last) = current.take() {
        report.entities += 1;
        write_entities(conn, output, &groups, settings, &[last], &mut written_any)?;
    }

    log::info!(
        "Aggregated {} rows into {} entities ({} pages) in {}",
        report.rows_read,
        report.entities,
        report.pages,
        output
    );
    Ok(report)
}

fn write_entities(
    conn: &rusqlite::Connection,
    output: &str,
    groups: &ColumnGroups,
    settings: &AggregationSettings,
    entities: &[EntityAccumulator],
    written_any: &mut bool,
) -> Result<()> {
    let mut frame = entity_frame(groups, entities)?;
    frame.round(settings.decimals);
    if *written_any {
        append_frame(conn, output, &frame)?;
    } else {
        replace_table(conn, output, &frame)?;
        *written_any = true;
    }
    Ok(())
}

fn entity_frame(groups: &ColumnGroups, entities: &[EntityAccumulator]) -> Result<Frame> {
    let mut frame = Frame::with_rows(entities.len());
    frame.insert(
        COL_EDINET_CODE,
        Column::Text(entities.iter().map(|e| Some(e.code.clone())).collect()),
    )?;

    for (i, name) in groups.ratios.iter().enumerate() {
        frame.insert_numeric(name.as_str(), entities.iter().map(|e| e.ratios[i].mean()).collect())?;
    }
    for (i, name) in groups.per_unit.iter().enumerate() {
        frame.insert_numeric(
            format!("{}_Average", name),
            entities.iter().map(|e| e.per_unit[i].mean()).collect(),
        )?;
        frame.insert_numeric(
            format!("{}_Std", name),
            entities.iter().map(|e| e.per_unit[i].std()).collect(),
        )?;
        frame.insert_numeric(
            format!("{}_Growth", name),
            entities.iter().map(|e| e.growth[i].growth()).collect(),
        )?;
    }
    for (i, name) in groups.market.iter().enumerate() {
        frame.insert_numeric(
            format!("{}_Latest", name),
            entities.iter().map(|e| e.market[i].value()).collect(),
        )?;
    }
    frame.insert_numeric(
        PERIOD_COUNT_COLUMN,
        entities.iter().map(|e| e.periods as f64).collect(),
    )?;
    Ok(frame)
}
