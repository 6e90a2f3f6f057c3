//! Configured step runner
//!
//! Steps run in a fixed order. A failing step is logged and recorded in the
//! report; the remaining steps still run.

use crate::aggregate::{aggregate_ratios, generate_rankings};
use crate::config::{AppConfig, RatioConfig, RunSteps};
use crate::data::store::export_csv;
use crate::data::{ingest_documents, standardize, DocumentSource, SqlitePriceSource, StandardizeSettings};
use crate::error::{RatioError, Result};
use crate::ratios::{RatioCatalog, RatioPipeline};
use crate::regression::{lagged_query, run_model, search, write_summary, ModelRunner};
use rusqlite::Connection;
use std::fmt;

/// A unit of work the orchestrator can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Ingest,
    Standardize,
    GenerateRatios,
    Aggregate,
    Rank,
    FindSignificantPredictors,
    MultivariateRegression,
    Export,
}

impl Step {
    /// Every step in execution order
    pub const ALL: [Step; 8] = [
        Step::Ingest,
        Step::Standardize,
        Step::GenerateRatios,
        Step::Aggregate,
        Step::Rank,
        Step::FindSignificantPredictors,
        Step::MultivariateRegression,
        Step::Export,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Ingest => "ingest",
            Step::Standardize => "standardize",
            Step::GenerateRatios => "generate_ratios",
            Step::Aggregate => "aggregate",
            Step::Rank => "rank",
            Step::FindSignificantPredictors => "find_significant_predictors",
            Step::MultivariateRegression => "multivariate_regression",
            Step::Export => "export",
        }
    }

    pub fn is_enabled(&self, steps: &RunSteps) -> bool {
        match self {
            Step::Ingest => steps.ingest,
            Step::Standardize => steps.standardize,
            Step::GenerateRatios => steps.generate_ratios,
            Step::Aggregate => steps.aggregate,
            Step::Rank => steps.rank,
            Step::FindSignificantPredictors => steps.find_significant_predictors,
            Step::MultivariateRegression => steps.multivariate_regression,
            Step::Export => steps.export,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed(String),
    Skipped(String),
    Failed(String),
}

/// Outcome of every enabled step, in execution order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub steps: Vec<(Step, StepOutcome)>,
}

impl RunReport {
    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    pub fn failed(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|(_, o)| matches!(o, StepOutcome::Failed(_)))
            .map(|(s, _)| *s)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }
}

/// Runs configured steps against one connection
pub struct Orchestrator<'a> {
    config: &'a AppConfig,
    ratio_config: &'a RatioConfig,
    conn: &'a Connection,
    documents: Option<&'a dyn DocumentSource>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a AppConfig, ratio_config: &'a RatioConfig, conn: &'a Connection) -> Self {
        Self {
            config,
            ratio_config,
            conn,
            documents: None,
        }
    }

    /// Document collaborator for the ingest step
    pub fn with_documents(mut self, source: &'a dyn DocumentSource) -> Self {
        self.documents = Some(source);
        self
    }

    /// Run every enabled step
    pub fn run(&self) -> RunReport {
        let steps: Vec<Step> = Step::ALL
            .into_iter()
            .filter(|s| s.is_enabled(&self.config.steps))
            .collect();
        self.run_steps(&steps)
    }

    /// Run `steps` in the given order regardless of the enabled flags
    pub fn run_steps(&self, steps: &[Step]) -> RunReport {
        let mut report = RunReport::default();
        for step in steps {
            log::info!("Running step {}", step);
            let outcome = match self.run_step(*step) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("Step {} failed: {}", step, e);
                    StepOutcome::Failed(e.to_string())
                }
            };
            if let StepOutcome::Completed(detail) | StepOutcome::Skipped(detail) = &outcome {
                log::info!("Step {}: {}", step, detail);
            }
            report.steps.push((*step, outcome));
        }
        report
    }

    pub fn run_step(&self, step: Step) -> Result<StepOutcome> {
        match step {
            Step::Ingest => self.ingest(),
            Step::Standardize => self.standardize(),
            Step::GenerateRatios => self.generate_ratios(),
            Step::Aggregate => self.aggregate(),
            Step::Rank => self.rank(),
            Step::FindSignificantPredictors => self.find_significant_predictors(),
            Step::MultivariateRegression => self.multivariate_regression(),
            Step::Export => self.export(),
        }
    }

    fn ingest(&self) -> Result<StepOutcome> {
        let Some(source) = self.documents else {
            return Ok(StepOutcome::Skipped("no document source configured".to_string()));
        };
        let settings = &self.config.ingest;
        let (Some(start), Some(end)) = (settings.start_date, settings.end_date) else {
            return Err(RatioError::ConfigError(
                "ingest needs both start_date and end_date".to_string(),
            ));
        };
        let report = ingest_documents(
            source,
            self.conn,
            &self.config.tables.facts,
            start,
            end,
            settings.doc_type_code.as_deref(),
        )?;
        Ok(StepOutcome::Completed(format!(
            "{} of {} documents ingested ({} facts, {} failed)",
            report.ingested,
            report.listed,
            report.facts,
            report.failed.len()
        )))
    }

    fn standardize(&self) -> Result<StepOutcome> {
        let tables = &self.config.tables;
        let settings = StandardizeSettings::from_config(self.ratio_config);
        let rows = standardize(self.conn, &tables.facts, &tables.standardized, &settings)?;
        Ok(StepOutcome::Completed(format!("{} facts kept in {}", rows, tables.standardized)))
    }

    fn generate_ratios(&self) -> Result<StepOutcome> {
        let tables = &self.config.tables;
        let catalog = RatioCatalog::compile(self.ratio_config);
        let prices = &self.config.prices;
        let source = SqlitePriceSource::new(self.conn, &prices.prices_table, &prices.companies_table);

        let mut pipeline = RatioPipeline::new(&catalog, &self.config.ratios);
        if prices.enabled {
            pipeline = pipeline.with_prices(&source, prices.column.as_str());
        }
        let report = pipeline.run(self.conn, &tables.standardized, &tables.ratios)?;
        Ok(StepOutcome::Completed(format!(
            "{} rows for {}/{} entities ({} ratio definitions rejected)",
            report.rows_written,
            report.succeeded,
            report.entities,
            catalog.rejected().len()
        )))
    }

    fn aggregate(&self) -> Result<StepOutcome> {
        let tables = &self.config.tables;
        let report = aggregate_ratios(self.conn, &tables.ratios, &tables.aggregated, &self.config.aggregation)?;
        Ok(StepOutcome::Completed(format!(
            "{} entities from {} rows in {} pages",
            report.entities, report.rows_read, report.pages
        )))
    }

    fn rank(&self) -> Result<StepOutcome> {
        let tables = &self.config.tables;
        let rows = generate_rankings(
            self.conn,
            &tables.aggregated,
            &tables.rankings,
            &self.config.rankings.criteria,
        )?;
        Ok(StepOutcome::Completed(format!("{} entities ranked", rows)))
    }

    fn find_significant_predictors(&self) -> Result<StepOutcome> {
        let settings = &self.config.search;
        let table = settings.table.as_deref().unwrap_or(&self.config.tables.ratios);
        let summary = search(
            self.conn,
            table,
            &self.config.tables.predictor_results,
            &settings.output_file,
            settings.winsorize,
            settings.alpha,
            &settings.dependent_variables,
        )?;
        Ok(StepOutcome::Completed(format!(
            "{} regressions, {} successful, {} significant",
            summary.total(),
            summary.successful(),
            summary.significant()
        )))
    }

    fn multivariate_regression(&self) -> Result<StepOutcome> {
        let settings = &self.config.multivariate;
        let (query, model) = if let Some(sql) = &settings.sql_query {
            let model = match &settings.dependent_variable {
                Some(dependent) => run_model(
                    self.conn,
                    sql,
                    dependent,
                    &settings.independent_variables,
                    settings.winsorize,
                ),
                None => {
                    let runner = ModelRunner::new(self.conn).with_limits(settings.winsorize);
                    runner.fit_query(sql).2
                }
            };
            (sql.clone(), model)
        } else if let Some(lagged) = &settings.lagged {
            let generated = lagged_query(lagged)?;
            let model = run_model(
                self.conn,
                &generated.sql,
                &generated.dependent,
                &generated.independents,
                settings.winsorize,
            );
            (generated.sql, model)
        } else {
            return Err(RatioError::ConfigError(
                "multivariate regression needs sql_query or lagged".to_string(),
            ));
        };

        write_summary(&settings.output_file, &query, &model, settings.alpha)?;
        let detail = match model.error() {
            None => format!(
                "{} observations, R-squared {:.4}, summary in {}",
                model.nobs(),
                model.rsquared(),
                settings.output_file.display()
            ),
            Some(e) => format!("empty model ({}), summary in {}", e, settings.output_file.display()),
        };
        Ok(StepOutcome::Completed(detail))
    }

    fn export(&self) -> Result<StepOutcome> {
        let settings = &self.config.export;
        if settings.path.as_os_str().is_empty() {
            return Err(RatioError::ConfigError("export needs a path".to_string()));
        }
        let table = settings.table.as_deref().unwrap_or(&self.config.tables.ratios);
        let rows = export_csv(self.conn, table, &settings.path, settings.modifier.as_deref())?;
        Ok(StepOutcome::Completed(format!(
            "{} rows of {} written to {}",
            rows,
            table,
            settings.path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig::from_toml_str("").unwrap()
    }

    #[test]
    fn test_step_order_and_names() {
        let names: Vec<&str> = Step::ALL.iter().map(Step::name).collect();
        assert_eq!(names[0], "ingest");
        assert_eq!(names[7], "export");
        assert_eq!(Step::FindSignificantPredictors.to_string(), "find_significant_predictors");
    }

    #[test]
    fn test_failing_step_does_not_stop_run() {
        let config = config();
        let ratio_config = RatioConfig::default();
        let conn = Connection::open_in_memory().unwrap();
        let orchestrator = Orchestrator::new(&config, &ratio_config, &conn);

        let report = orchestrator.run_steps(&[Step::Aggregate, Step::Ingest, Step::Export]);
        assert_eq!(report.steps.len(), 3);
        assert!(matches!(report.outcome(Step::Aggregate), Some(StepOutcome::Failed(_))));
        assert!(matches!(report.outcome(Step::Ingest), Some(StepOutcome::Skipped(_))));
        assert!(matches!(report.outcome(Step::Export), Some(StepOutcome::Failed(_))));
        assert_eq!(report.failed(), vec![Step::Aggregate, Step::Export]);
        assert!(!report.is_success());
    }

    #[test]
    fn test_disabled_steps_do_not_run() {
        let mut config = config();
        let ratio_config = RatioConfig::default();
        let conn = Connection::open_in_memory().unwrap();
        assert!(Orchestrator::new(&config, &ratio_config, &conn).run().steps.is_empty());

        config.steps.ingest = true;
        let report = Orchestrator::new(&config, &ratio_config, &conn).run();
        assert_eq!(report.steps.len(), 1);
        assert!(report.is_success());
    }
}
