//! Entity rankings over the aggregated table

use crate::config::RankCriterion;
use crate::data::store::{quote_ident, read_frame, replace_table};
use crate::error::{RatioError, Result};
use crate::types::{is_missing, MISSING};

/// Column holding the weighted sum of ranks
pub const WEIGHTED_RANK_COLUMN: &str = "Weighted_Rank";

/// 1-based ranks; ties share the average of their positions and missing stays missing
pub fn rank_average(values: &[f64], ascending: bool) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).filter(|i| !is_missing(values[*i])).collect();
    order.sort_by(|a, b| {
        let ord = values[*a].total_cmp(&values[*b]);
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });

    let mut ranks = vec![MISSING; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start+1 ..= end share their mean
        let rank = (start + 1 + end) as f64 / 2.0;
        for i in &order[start..end] {
            ranks[*i] = rank;
        }
        start = end;
    }
    ranks
}

/// Rank `input` by each criterion and write the ranked table to `output`
///
/// Adds `Ranking_<column>` per criterion and `Weighted_Rank`; the output is replaced.
pub fn generate_rankings(
    conn: &rusqlite::Connection,
    input: &str,
    output: &str,
    criteria: &[RankCriterion],
) -> Result<usize> {
    if criteria.is_empty() {
        return Err(RatioError::ConfigError("No ranking criteria configured".to_string()));
    }

    let mut frame = read_frame(conn, &format!("SELECT * FROM {}", quote_ident(input)), [])?;
    let mut weighted = vec![0.0; frame.len()];

    for criterion in criteria {
        let values = frame
            .numeric_values(&criterion.column)
            .ok_or_else(|| RatioError::MissingColumn {
                table: input.to_string(),
                column: criterion.column.clone(),
            })?;
        let ranks = rank_average(&values, criterion.ascending);
        for (total, rank) in weighted.iter_mut().zip(&ranks) {
            *total += criterion.weight * rank;
        }
        frame.insert_numeric(format!("Ranking_{}", criterion.column), ranks)?;
    }
    frame.insert_numeric(WEIGHTED_RANK_COLUMN, weighted)?;

    let rows = replace_table(conn, output, &frame)?;
    log::info!("Ranked {} entities on {} criteria into {}", rows, criteria.len(), output);
    Ok(rows)
}
