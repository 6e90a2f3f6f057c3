//! # edinet-ratios
//!
//! Financial ratio derivation and significant-predictor search over EDINET
//! filings.
//!
//! Tagged facts are pivoted per entity into a wide table, synonym columns are
//! resolved, configured ratio expressions are evaluated and every ratio gets
//! trailing multi-year statistics. The ratio table can then be aggregated to
//! one row per entity, ranked, and searched for single-variable relationships
//! with ordinary least squares.
//!
//! ## Example
//!
//! ```rust,no_run
//! use edinet_ratios::prelude::*;
//!
//! fn main() -> edinet_ratios::error::Result<()> {
//!     let config = AppConfig::load(std::path::Path::new("config/edinet.toml"))?;
//!     let definitions = RatioConfig::load(&config.ratio_definitions)?;
//!     let conn = edinet_ratios::data::store::open(&config.database)?;
//!
//!     let report = Orchestrator::new(&config, &definitions, &conn).run();
//!     for step in report.failed() {
//!         eprintln!("{} failed", step);
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod data;
pub mod error;
pub mod orchestrator;
pub mod ratios;
pub mod regression;
pub mod types;

pub mod prelude {
    //! Commonly used types and functions
    pub use crate::aggregate::{aggregate_ratios, generate_rankings};
    pub use crate::config::{AppConfig, RatioConfig, WinsorizeLimits};
    pub use crate::data::{DocumentSource, Frame, PriceSource};
    pub use crate::error::{RatioError, Result};
    pub use crate::orchestrator::{Orchestrator, RunReport, Step, StepOutcome};
    pub use crate::ratios::{evaluate, Expression, Operator, RatioCatalog, RatioPipeline};
    pub use crate::regression::{run_model, search, FittedModel, ModelRunner, RegressionResult};
    pub use crate::types::*;
}
