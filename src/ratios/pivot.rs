//! Long-to-wide reshaping of tagged facts

use crate::data::{Cell, Column, Frame};
use crate::error::{RatioError, Result};
use crate::types::{
    COL_ACCOUNTING_TERM, COL_AMOUNT, COL_DOC_ID, COL_DOC_TYPE_CODE, COL_EDINET_CODE, COL_PERIOD,
    COL_PERIOD_END, COL_PERIOD_START, RATIO_INDEX_COLUMNS,
};
use hashbrown::HashMap;
use std::collections::{BTreeMap, BTreeSet};

/// Row key in chronological order: (periodStart, periodEnd, docID, docTypeCode, edinetCode)
type RowKey = [String; 5];

fn required<'a>(facts: &'a Frame, name: &str) -> Result<&'a Column> {
    facts.column(name).ok_or_else(|| RatioError::MissingColumn {
        table: "facts".to_string(),
        column: name.to_string(),
    })
}

/// Pivot facts into one row per filing and one column per `AccountingTerm_Period`
///
/// Rows are ordered by period, so a single entity's rows come out
/// chronologically. When a key repeats within a row, the first non-missing
/// amount in input order is kept. Facts lacking an index value or a key part
/// are dropped. Values stay raw; numeric coercion is left to the caller.
pub fn pivot_facts(facts: &Frame) -> Result<Frame> {
    let code = required(facts, COL_EDINET_CODE)?;
    let doc_id = required(facts, COL_DOC_ID)?;
    let doc_type = required(facts, COL_DOC_TYPE_CODE)?;
    let start = required(facts, COL_PERIOD_START)?;
    let end = required(facts, COL_PERIOD_END)?;
    let term = required(facts, COL_ACCOUNTING_TERM)?;
    let period = required(facts, COL_PERIOD)?;
    let amount = required(facts, COL_AMOUNT)?;

    let mut rows: BTreeMap<RowKey, HashMap<String, Cell>> = BTreeMap::new();
    let mut keys: BTreeSet<String> = BTreeSet::new();
    let mut dropped = 0usize;

    for i in 0..facts.len() {
        let index = [
            start.text_at(i),
            end.text_at(i),
            doc_id.text_at(i),
            doc_type.text_at(i),
            code.text_at(i),
        ];
        let (Some(row_key), Some(t), Some(p)) = (collect_key(index), term.text_at(i), period.text_at(i))
        else {
            dropped += 1;
            continue;
        };

        let key = format!("{}_{}", t, p);
        let values = rows.entry(row_key).or_default();
        keys.insert(key.clone());

        let value = amount.cell_at(i);
        if value.is_null() {
            continue;
        }
        values.entry(key).or_insert(value);
    }

    if dropped > 0 {
        log::debug!("Dropped {} facts with incomplete index or key", dropped);
    }

    let row_keys: Vec<&RowKey> = rows.keys().collect();
    let mut frame = Frame::with_rows(row_keys.len());

    // Index columns in output order; RowKey stores them chronologically first
    let positions = [4usize, 2, 3, 0, 1];
    for (name, position) in RATIO_INDEX_COLUMNS.iter().zip(positions) {
        let column = row_keys.iter().map(|k| Some(k[position].clone())).collect();
        frame.insert(*name, Column::Text(column))?;
    }

    for key in &keys {
        let cells = rows
            .values()
            .map(|values| values.get(key).cloned().unwrap_or(Cell::Null))
            .collect();
        frame.insert(key.clone(), Column::from_cells(cells))?;
    }

    Ok(frame)
}

fn collect_key(parts: [Option<String>; 5]) -> Option<RowKey> {
    let [a, b, c, d, e] = parts;
    Some([a?, b?, c?, d?, e?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::COL_CURRENCY;

    type Row<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str, Option<&'a str>);

    fn facts(rows: &[Row]) -> Frame {
        let text = |values: Vec<Option<&str>>| {
            Column::Text(values.into_iter().map(|v| v.map(String::from)).collect())
        };
        let constant = |value: &str| text(rows.iter().map(|_| Some(value)).collect());
        Frame::from_columns(vec![
            (COL_EDINET_CODE.to_string(), constant("E00001")),
            (COL_DOC_ID.to_string(), text(rows.iter().map(|r| Some(r.0)).collect())),
            (COL_DOC_TYPE_CODE.to_string(), constant("120")),
            (COL_PERIOD_START.to_string(), text(rows.iter().map(|r| Some(r.1)).collect())),
            (COL_PERIOD_END.to_string(), text(rows.iter().map(|r| Some(r.2)).collect())),
            (COL_ACCOUNTING_TERM.to_string(), text(rows.iter().map(|r| Some(r.3)).collect())),
            (COL_PERIOD.to_string(), text(rows.iter().map(|r| Some(r.4)).collect())),
            (COL_CURRENCY.to_string(), constant("JPY")),
            (COL_AMOUNT.to_string(), text(rows.iter().map(|r| r.5).collect())),
        ])
        .unwrap()
    }

    #[test]
    fn test_first_value_wins_on_collision() {
        let frame = facts(&[
            ("S1", "2023-04-01", "2024-03-31", "NetIncome", "CurrentYear", Some("100")),
            ("S1", "2023-04-01", "2024-03-31", "NetIncome", "CurrentYear", Some("200")),
        ]);
        let wide = pivot_facts(&frame).unwrap();
        assert_eq!(wide.len(), 1);
        assert_eq!(wide.numeric_values("NetIncome_CurrentYear").unwrap(), vec![100.0]);
    }

    #[test]
    fn test_null_does_not_win_collision() {
        let frame = facts(&[
            ("S1", "2023-04-01", "2024-03-31", "NetIncome", "CurrentYear", None),
            ("S1", "2023-04-01", "2024-03-31", "NetIncome", "CurrentYear", Some("7")),
        ]);
        let wide = pivot_facts(&frame).unwrap();
        assert_eq!(wide.numeric_values("NetIncome_CurrentYear").unwrap(), vec![7.0]);
    }

    #[test]
    fn test_rows_ordered_by_period() {
        let frame = facts(&[
            ("S2", "2023-04-01", "2024-03-31", "Sales", "CurrentYear", Some("120")),
            ("S1", "2022-04-01", "2023-03-31", "Sales", "CurrentYear", Some("100")),
            ("S1", "2022-04-01", "2023-03-31", "Assets", "CurrentYear", Some("50")),
        ]);
        let wide = pivot_facts(&frame).unwrap();

        assert_eq!(wide.len(), 2);
        assert_eq!(
            wide.column_names(),
            &[
                "edinetCode",
                "docID",
                "docTypeCode",
                "periodStart",
                "periodEnd",
                "Assets_CurrentYear",
                "Sales_CurrentYear"
            ]
        );
        assert_eq!(
            wide.text(COL_DOC_ID).unwrap(),
            &[Some("S1".to_string()), Some("S2".to_string())]
        );
        assert_eq!(wide.numeric_values("Sales_CurrentYear").unwrap(), vec![100.0, 120.0]);
        assert!(wide.numeric_values("Assets_CurrentYear").unwrap()[1].is_nan());
    }

    #[test]
    fn test_non_numeric_amount_kept_raw() {
        let frame = facts(&[("S1", "2023-04-01", "2024-03-31", "Name", "CurrentYear", Some("－"))]);
        let wide = pivot_facts(&frame).unwrap();
        assert_eq!(wide.text("Name_CurrentYear").unwrap(), &[Some("－".to_string())]);
    }

    #[test]
    fn test_missing_column() {
        let frame = Frame::from_columns(vec![(
            COL_EDINET_CODE.to_string(),
            Column::Text(vec![Some("E1".to_string())]),
        )])
        .unwrap();
        assert!(matches!(
            pivot_facts(&frame),
            Err(RatioError::MissingColumn { .. })
        ));
    }
}
