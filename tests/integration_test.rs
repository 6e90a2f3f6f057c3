//! End-to-end tests: facts -> standardized facts -> ratios -> aggregation -> search

use approx::assert_relative_eq;
use edinet_ratios::aggregate::PERIOD_COUNT_COLUMN;
use edinet_ratios::config::{AppConfig, RatioConfig};
use edinet_ratios::data::store::{insert_facts, read_frame, table_exists};
use edinet_ratios::orchestrator::{Orchestrator, Step, StepOutcome};
use edinet_ratios::types::TaggedFact;
use rusqlite::Connection;
use std::path::Path;

const DEFINITIONS: &str = r#"{
    "mappings": [
        {"name": "netSales", "candidates": ["jppfs_cor:NetSales_CurrentYearDuration", "jppfs_cor:Revenue_CurrentYearDuration"]},
        {"name": "netIncome", "candidates": ["jppfs_cor:ProfitLoss_CurrentYearDuration", "jppfs_cor:NetIncome_CurrentYearDuration"]},
        {"name": "netIncome_prior", "candidate_source_columns": ["jppfs_cor:NetIncome_Prior1YearDuration"]}
    ],
    "ratios": [
        {"output": "Ratio_NetMargin", "expression": {"operator": "/", "operands": [{"column": "netIncome"}, {"column": "netSales"}]}},
        {"output_name": "Ratio_netIncome_Growth", "expression_tree": {
            "operator": "/",
            "operands": [
                {"operator": "-", "operands": [{"column": "netIncome"}, {"column": "netIncome_prior"}]},
                {"column": "netIncome_prior"}
            ]
        }},
        {"output": "Ratio_Broken", "expression": {"operator": "^", "operands": [{"value": 1}, {"value": 2}]}}
    ],
    "accounting_term_conditions": ["jppfs_cor:%"],
    "period_conditions": ["CurrentYearDuration", "Prior1YearDuration"]
}"#;

fn fact(term: &str, period: &str, amount: &str, doc: &str, start: &str, end: &str) -> TaggedFact {
    TaggedFact {
        accounting_term: term.to_string(),
        period: period.to_string(),
        currency: Some("JPY".to_string()),
        amount: Some(amount.to_string()),
        doc_id: doc.to_string(),
        edinet_code: "E00001".to_string(),
        doc_type_code: "120".to_string(),
        submit_date_time: Some(format!("{} 09:00", end)),
        period_start: start.to_string(),
        period_end: end.to_string(),
    }
}

/// Two fiscal years: NetSales 100 -> 120, NetIncome 10 -> 15
fn seed(conn: &Connection) {
    let facts = vec![
        fact("jppfs_cor:NetSales", "CurrentYearDuration", "100", "S100A", "2022-04-01", "2023-03-31"),
        fact("jppfs_cor:NetIncome", "CurrentYearDuration", "10", "S100A", "2022-04-01", "2023-03-31"),
        fact("jpcrp_cor:NumberOfEmployees", "CurrentYearInstant", "50", "S100A", "2022-04-01", "2023-03-31"),
        fact("jppfs_cor:NetSales", "CurrentYearDuration", "120", "S100B", "2023-04-01", "2024-03-31"),
        fact("jppfs_cor:NetIncome", "CurrentYearDuration", "15", "S100B", "2023-04-01", "2024-03-31"),
        fact("jppfs_cor:NetIncome", "Prior1YearDuration", "10", "S100B", "2023-04-01", "2024-03-31"),
        // duplicate context: first value wins
        fact("jppfs_cor:NetIncome", "CurrentYearDuration", "999", "S100B", "2023-04-01", "2024-03-31"),
    ];
    insert_facts(conn, "financialData_full", &facts).unwrap();
}

fn config(dir: &Path) -> AppConfig {
    let toml = format!(
        r#"
database = "{db}"

[steps]
standardize = true
generate_ratios = true
aggregate = true
find_significant_predictors = true
export = true

[search]
output_file = "{search}"
alpha = 0.05

[export]
table = "Standard_Data_Ratios_Aggregated"
path = "{csv}"
"#,
        db = dir.join("edinet.db").display(),
        search = dir.join("ols").join("search.txt").display(),
        csv = dir.join("aggregated.csv").display(),
    );
    AppConfig::from_toml_str(&toml).unwrap()
}

#[test]
fn test_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let definitions = RatioConfig::from_json_str(DEFINITIONS).unwrap();
    let conn = edinet_ratios::data::store::open(&config.database).unwrap();
    seed(&conn);

    let report = Orchestrator::new(&config, &definitions, &conn).run();
    assert_eq!(
        report.steps.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
        vec![
            Step::Standardize,
            Step::GenerateRatios,
            Step::Aggregate,
            Step::FindSignificantPredictors,
            Step::Export
        ]
    );
    assert!(report.is_success(), "{:?}", report);

    // Standardization keeps only jppfs facts
    let standardized = read_frame(&conn, "SELECT COUNT(*) AS n FROM Standard_Data", []).unwrap();
    assert_eq!(standardized.numeric_values("n").unwrap(), vec![6.0]);

    let ratios = read_frame(
        &conn,
        "SELECT * FROM Standard_Data_Ratios ORDER BY periodStart",
        [],
    )
    .unwrap();
    assert_eq!(ratios.len(), 2);

    let growth = ratios.numeric_values("Ratio_netIncome_Growth").unwrap();
    assert!(growth[0].is_nan());
    assert_relative_eq!(growth[1], 0.5, epsilon = 1e-9);

    let margin = ratios.numeric_values("Ratio_NetMargin").unwrap();
    assert_relative_eq!(margin[0], 0.1, epsilon = 1e-9);
    assert_relative_eq!(margin[1], 0.125, epsilon = 1e-9);

    let average = ratios.numeric_values("Ratio_NetMargin_3Year_Average").unwrap();
    assert_relative_eq!(average[1], 0.1125, epsilon = 1e-4);
    let yoy = ratios.numeric_values("Ratio_NetMargin_1Year_Growth").unwrap();
    assert!(yoy[0].is_nan());
    assert_relative_eq!(yoy[1], 0.25, epsilon = 1e-9);

    // Malformed definition is skipped, raw taxonomy columns are dropped
    assert!(!ratios.has_column("Ratio_Broken"));
    assert!(!ratios.has_column("jppfs_cor:NetSales_CurrentYearDuration"));
    assert!(!ratios.has_column("jpcrp_cor:NumberOfEmployees_CurrentYearInstant"));
    assert!(ratios.has_column("netSales"));

    let aggregated = read_frame(&conn, "SELECT * FROM Standard_Data_Ratios_Aggregated", []).unwrap();
    assert_eq!(aggregated.len(), 1);
    assert_relative_eq!(aggregated.numeric_values("Ratio_NetMargin").unwrap()[0], 0.11, epsilon = 1e-9);
    assert_relative_eq!(aggregated.numeric_values("Ratio_netIncome_Growth").unwrap()[0], 0.5, epsilon = 1e-9);
    assert_eq!(aggregated.numeric_values(PERIOD_COUNT_COLUMN).unwrap(), vec![2.0]);

    // Two rows cannot identify a model: every pair fails but the sweep completes
    let summary = std::fs::read_to_string(dir.path().join("ols").join("search.txt")).unwrap();
    assert!(summary.contains("Successful regressions: 0"));
    assert!(!table_exists(&conn, "predictor_search_results").unwrap());

    let csv = std::fs::read_to_string(dir.path().join("aggregated.csv")).unwrap();
    assert!(csv.starts_with("edinetCode"));
    assert!(csv.contains("E00001"));
}

#[test]
fn test_rerun_appends_ratio_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let definitions = RatioConfig::from_json_str(DEFINITIONS).unwrap();
    let conn = Connection::open_in_memory().unwrap();
    seed(&conn);

    let orchestrator = Orchestrator::new(&config, &definitions, &conn);
    let steps = [Step::Standardize, Step::GenerateRatios];
    assert!(orchestrator.run_steps(&steps).is_success());
    assert!(orchestrator.run_steps(&steps).is_success());

    let ratios = read_frame(&conn, "SELECT * FROM Standard_Data_Ratios", []).unwrap();
    assert_eq!(ratios.len(), 4);
}

#[test]
fn test_missing_input_fails_step_only() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let definitions = RatioConfig::from_json_str(DEFINITIONS).unwrap();
    let conn = Connection::open_in_memory().unwrap();

    let report = Orchestrator::new(&config, &definitions, &conn).run();
    assert_eq!(report.steps.len(), 5);
    assert!(matches!(report.outcome(Step::Standardize), Some(StepOutcome::Failed(_))));
    assert!(matches!(report.outcome(Step::Export), Some(StepOutcome::Failed(_))));
}
