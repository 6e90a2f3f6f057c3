//! Regression model runner, lagged query generation and predictor search

pub mod ols;
pub mod query;
pub mod report;
pub mod runner;
pub mod search;

pub use ols::{fit_ols, Coefficient, FitError, FittedModel, OlsResults, INTERCEPT};
pub use query::{lagged_query, GeneratedQuery};
pub use report::{render_summary, write_summary};
pub use runner::{fit_frame, quantile, run_model, winsorize_mask, ModelRunner};
pub use search::{
    rank_results, search, significance_stars, sweep, FitStatus, RegressionResult, SearchSummary,
};
