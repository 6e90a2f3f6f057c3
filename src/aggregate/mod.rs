//! Entity-level aggregation and rankings

pub mod aggregator;
pub mod rankings;

pub use aggregator::{aggregate_ratios, annualized_growth, AggregationReport, PERIOD_COUNT_COLUMN};
pub use rankings::{generate_rankings, rank_average, WEIGHTED_RANK_COLUMN};
