//! Lagged self-join queries for multivariate models
//!
//! Lag `i` joins the ratio table to itself on the same entity where the
//! lagged filing ends 1 to 5 days before the previous alias begins, i.e. the
//! immediately preceding fiscal year.

use crate::config::LaggedQuerySpec;
use crate::error::{RatioError, Result};
use crate::types::{COL_EDINET_CODE, COL_PERIOD_END, COL_PERIOD_START};

/// A generated query and the model columns it selects
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuery {
    pub sql: String,
    pub dependent: String,
    pub independents: Vec<String>,
}

/// Build the lagged query described by `definition`
pub fn lagged_query(definition: &LaggedQuerySpec) -> Result<GeneratedQuery> {
    if definition.periods == 0 {
        return Err(RatioError::ConfigError("Lagged query needs at least one period".into()));
    }
    if definition.independent.is_empty() {
        return Err(RatioError::ConfigError("Lagged query has no independent variables".into()));
    }

    let base = &definition.table.alias;
    let mut select = vec![
        format!("{}.{}", base, COL_EDINET_CODE),
        format!("{}.{}", base, COL_PERIOD_START),
        format!("{} AS {}", definition.dependent.formula, definition.dependent.name),
    ];
    let mut conditions = vec![format!("{} IS NOT NULL", definition.dependent.formula)];
    let mut independents = Vec::new();

    for lag in 0..definition.periods {
        for variable in &definition.independent {
            let alias = format!("{}_{}", variable.table_alias, lag);
            let output = format!("{}_{}", variable.name, lag);
            select.push(format!("{}.{} AS {}", alias, variable.name, output));
            conditions.push(format!("{}.{} IS NOT NULL", alias, variable.name));
            independents.push(output);
        }
    }

    let mut from = format!("{} AS {}", definition.table.name, base);
    for lag in 0..definition.periods {
        let current = if lag == 0 {
            base.clone()
        } else {
            format!("{}_{}", base, lag - 1)
        };
        let lagged = format!("{}_{}", base, lag);
        from.push_str(&format!(
            " LEFT JOIN {table} AS {lagged} ON {current}.{code} = {lagged}.{code} \
             AND julianday({current}.{start}) - julianday({lagged}.{end}) BETWEEN 1 AND 5",
            table = definition.table.name,
            lagged = lagged,
            current = current,
            code = COL_EDINET_CODE,
            start = COL_PERIOD_START,
            end = COL_PERIOD_END,
        ));
    }

    let sql = format!(
        "SELECT {}\nFROM {}\nWHERE {}",
        select.join(", "),
        from,
        conditions.join(" AND ")
    );
    Ok(GeneratedQuery {
        sql,
        dependent: definition.dependent.name.clone(),
        independents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DependentSpec, IndependentSpec, TableRef, WinsorizeLimits};
    use crate::regression::runner::run_model;
    use rusqlite::Connection;

    fn definition(periods: usize) -> LaggedQuerySpec {
        LaggedQuerySpec {
            dependent: DependentSpec {
                name: "Return".to_string(),
                formula: "r.Ratio_Return".to_string(),
            },
            independent: vec![IndependentSpec {
                table_alias: "r".to_string(),
                name: "Ratio_ROE".to_string(),
            }],
            table: TableRef {
                name: "ratios".to_string(),
                alias: "r".to_string(),
            },
            periods,
        }
    }

    #[test]
    fn test_lagged_query_shape() {
        let query = lagged_query(&definition(2)).unwrap();
        assert_eq!(query.dependent, "Return");
        assert_eq!(query.independents, vec!["Ratio_ROE_0", "Ratio_ROE_1"]);
        assert!(query.sql.contains("LEFT JOIN ratios AS r_0 ON r.edinetCode = r_0.edinetCode"));
        assert!(query.sql.contains("LEFT JOIN ratios AS r_1 ON r_0.edinetCode = r_1.edinetCode"));
        assert!(query.sql.contains("r_1.Ratio_ROE IS NOT NULL"));
    }

    #[test]
    fn test_lagged_query_rejects_empty() {
        assert!(lagged_query(&definition(0)).is_err());
        let mut no_vars = definition(1);
        no_vars.independent.clear();
        assert!(lagged_query(&no_vars).is_err());
    }

    #[test]
    fn test_lagged_query_runs() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ratios (edinetCode TEXT, periodStart TEXT, periodEnd TEXT, Ratio_Return REAL, Ratio_ROE REAL);",
        )
        .unwrap();
        // one filing per entity and year; return follows last year's ROE
        for entity in 0..6 {
            for year in 2015..2021 {
                let roe = (entity * 7 + year * 3) % 11;
                let ret = 0.5 * (((entity * 7 + (year - 1) * 3) % 11) as f64) + entity as f64 * 0.01;
                conn.execute(
                    "INSERT INTO ratios VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        format!("E{}", entity),
                        format!("{}-04-01", year),
                        format!("{}-03-31", year + 1),
                        ret,
                        roe as f64
                    ],
                )
                .unwrap();
            }
        }

        let query = lagged_query(&definition(1)).unwrap();
        let model = run_model(
            &conn,
            &query.sql,
            &query.dependent,
            &query.independents,
            WinsorizeLimits::keep_all(),
        );
        // the earliest year of each entity has no predecessor
        assert_eq!(model.nobs(), 6 * 5);
        assert!(model.rsquared() > 0.99);
    }
}
