//! Run configuration (TOML) and ratio definitions (JSON)

use crate::error::{RatioError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Process-wide settings, built once at start-up and passed down explicitly
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: PathBuf,
    pub ratio_definitions: PathBuf,
    pub tables: TableNames,
    pub steps: RunSteps,
    pub ingest: IngestSettings,
    pub ratios: RatioSettings,
    pub prices: PriceSettings,
    pub aggregation: AggregationSettings,
    pub rankings: RankingSettings,
    pub search: SearchSettings,
    pub multivariate: MultivariateSettings,
    pub export: ExportSettings,
}

impl AppConfig {
    /// Load from a TOML file; any read or parse failure is fatal
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RatioError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(contents)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        if self.database.as_os_str().is_empty() {
            self.database = PathBuf::from("data/edinet.db");
        }
        if self.ratio_definitions.as_os_str().is_empty() {
            self.ratio_definitions = PathBuf::from("config/financial_ratios.json");
        }
    }

    /// Check value ranges the type system cannot express
    pub fn validate(&self) -> Result<()> {
        self.search.winsorize.validate()?;
        self.multivariate.winsorize.validate()?;
        for alpha in [self.search.alpha, self.multivariate.alpha] {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(RatioError::ConfigError(format!(
                    "Significance level must lie in (0, 1), got {}",
                    alpha
                )));
            }
        }
        if self.aggregation.chunk_size == 0 {
            return Err(RatioError::ConfigError("Aggregation chunk size must be positive".into()));
        }
        if let Some(lagged) = &self.multivariate.lagged {
            if lagged.periods == 0 {
                return Err(RatioError::ConfigError("Lagged query needs at least one period".into()));
            }
        }
        Ok(())
    }
}

/// Table names used by the pipeline steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub facts: String,
    pub standardized: String,
    pub ratios: String,
    pub aggregated: String,
    pub rankings: String,
    pub predictor_results: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            facts: "financialData_full".to_string(),
            standardized: "Standard_Data".to_string(),
            ratios: "Standard_Data_Ratios".to_string(),
            aggregated: "Standard_Data_Ratios_Aggregated".to_string(),
            rankings: "Standard_Data_Ratios_Rankings".to_string(),
            predictor_results: "predictor_search_results".to_string(),
        }
    }
}

/// Which steps a run executes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSteps {
    pub ingest: bool,
    pub standardize: bool,
    pub generate_ratios: bool,
    pub aggregate: bool,
    pub rank: bool,
    pub find_significant_predictors: bool,
    pub multivariate_regression: bool,
    pub export: bool,
}

/// Document ingestion window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub doc_type_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatioSettings {
    pub decimals: u32,
    /// Raw taxonomy columns with these prefixes are dropped once mappings are resolved
    pub drop_prefixes: Vec<String>,
    /// Drop the ratio table before deriving
    pub replace_existing: bool,
}

impl Default for RatioSettings {
    fn default() -> Self {
        Self {
            decimals: 4,
            drop_prefixes: vec!["jppfs_cor:".to_string(), "jpcrp_cor:".to_string()],
            replace_existing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    pub enabled: bool,
    pub prices_table: String,
    pub companies_table: String,
    /// Column the looked-up price is stored under
    pub column: String,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            prices_table: "stock_prices".to_string(),
            companies_table: "companyInfo".to_string(),
            column: "PerShare_SharePrice".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub chunk_size: usize,
    /// Columns averaged per entity
    pub ratio_prefix: String,
    /// Columns summarised by mean, std and annualised growth
    pub per_unit_prefix: String,
    /// Columns reduced to their most recent value
    pub market_value_prefix: String,
    pub decimals: u32,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            ratio_prefix: "Ratio_".to_string(),
            per_unit_prefix: "PerShare_".to_string(),
            market_value_prefix: "MarketCap".to_string(),
            decimals: 2,
        }
    }
}

/// One ranked column of the aggregated table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankCriterion {
    pub column: String,
    /// Rank 1 goes to the smallest value when true
    #[serde(default)]
    pub ascending: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSettings {
    pub criteria: Vec<RankCriterion>,
}

/// Quantile band for joint outlier-row exclusion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WinsorizeLimits {
    pub lower: f64,
    pub upper: f64,
}

impl WinsorizeLimits {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        let limits = Self { lower, upper };
        limits.validate()?;
        Ok(limits)
    }

    /// Limits that keep every row
    pub fn keep_all() -> Self {
        Self { lower: 0.0, upper: 1.0 }
    }

    pub fn validate(&self) -> Result<()> {
        let in_unit = |q: f64| (0.0..=1.0).contains(&q);
        if !in_unit(self.lower) || !in_unit(self.upper) || self.lower > self.upper {
            return Err(RatioError::ConfigError(format!(
                "Invalid winsorize limits ({}, {}): need 0 <= lower <= upper <= 1",
                self.lower, self.upper
            )));
        }
        Ok(())
    }

    pub fn is_keep_all(&self) -> bool {
        self.lower <= 0.0 && self.upper >= 1.0
    }
}

impl Default for WinsorizeLimits {
    fn default() -> Self {
        Self {
            lower: 0.01,
            upper: 0.99,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Table searched; defaults to the ratio table when empty
    pub table: Option<String>,
    pub output_file: PathBuf,
    pub winsorize: WinsorizeLimits,
    pub alpha: f64,
    /// Restricts the dependent side only; empty means every eligible column
    pub dependent_variables: Vec<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            table: None,
            output_file: PathBuf::from("data/ols_results/predictor_search_results.txt"),
            winsorize: WinsorizeLimits {
                lower: 0.05,
                upper: 0.95,
            },
            alpha: 0.05,
            dependent_variables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultivariateSettings {
    pub output_file: PathBuf,
    pub winsorize: WinsorizeLimits,
    pub alpha: f64,
    /// Explicit query; takes precedence over `lagged`
    pub sql_query: Option<String>,
    pub dependent_variable: Option<String>,
    pub independent_variables: Vec<String>,
    pub lagged: Option<LaggedQuerySpec>,
}

impl Default for MultivariateSettings {
    fn default() -> Self {
        Self {
            output_file: PathBuf::from("data/ols_results/ols_results_summary.txt"),
            winsorize: WinsorizeLimits::default(),
            alpha: 0.05,
            sql_query: None,
            dependent_variable: None,
            independent_variables: Vec::new(),
            lagged: None,
        }
    }
}

/// Dependent variable of a lagged query: an SQL formula and the name it is selected as
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependentSpec {
    pub name: String,
    pub formula: String,
}

/// Independent variable of a lagged query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndependentSpec {
    pub table_alias: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    pub alias: String,
}

/// Self-join of a ratio table over `periods` earlier filings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaggedQuerySpec {
    pub dependent: DependentSpec,
    pub independent: Vec<IndependentSpec>,
    pub table: TableRef,
    pub periods: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub table: Option<String>,
    pub path: PathBuf,
    /// Appended verbatim after `SELECT * FROM table`
    pub modifier: Option<String>,
}

/// Synonym resolution: first present candidate per row wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub name: String,
    #[serde(alias = "candidate_source_columns")]
    pub candidates: Vec<String>,
}

/// A named ratio; the expression tree is compiled later so one bad entry cannot spoil the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioDefinition {
    #[serde(alias = "output_name")]
    pub output: String,
    #[serde(alias = "expression_tree")]
    pub expression: serde_json::Value,
}

/// Ratio definitions file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatioConfig {
    pub mappings: Vec<ColumnMapping>,
    pub ratios: Vec<RatioDefinition>,
    pub accounting_term_conditions: Vec<String>,
    pub period_conditions: Vec<String>,
    pub standard_column_mapping: BTreeMap<String, String>,
}

impl RatioConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RatioError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| RatioError::ConfigError(format!("Invalid ratio definitions: {}", e)))
    }
}
