//! Ratio derivation engine
//!
//! Facts are pivoted per entity, synonym columns are resolved through
//! fallback chains, configured ratio expressions are evaluated in order and
//! each ratio gets trailing multi-year statistics.

pub mod catalog;
pub mod expression;
pub mod pipeline;
pub mod pivot;
pub mod rolling;

pub use catalog::{CompiledRatio, RatioCatalog, RejectedDefinition, ResolvedMapping};
pub use expression::{evaluate, Evaluated, Expression, Operator};
pub use pipeline::{DerivationReport, RatioPipeline};
pub use pivot::pivot_facts;
pub use rolling::{rolling_statistics, RollingStatistic, RollingWindow};
