//! Compiled ratio definitions
//!
//! The catalog parses every mapping and ratio once, so a malformed entry is
//! reported up front and the full output schema is known before any entity
//! is processed.

use super::expression::Expression;
use super::rolling::RollingStatistic;
use crate::config::RatioConfig;
use crate::data::store::SqlType;
use crate::error::RatioError;
use crate::types::RATIO_INDEX_COLUMNS;
use hashbrown::HashSet;

/// Synonym column resolved through a fallback chain
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMapping {
    pub name: String,
    pub candidates: Vec<String>,
    pub expression: Expression,
}

/// A ratio whose expression parsed successfully
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRatio {
    pub output: String,
    pub expression: Expression,
}

/// A definition that was left out of the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedDefinition {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RatioCatalog {
    mappings: Vec<ResolvedMapping>,
    ratios: Vec<CompiledRatio>,
    rejected: Vec<RejectedDefinition>,
}

impl RatioCatalog {
    /// Compile definitions; malformed entries are logged and skipped
    pub fn compile(config: &RatioConfig) -> Self {
        let mut catalog = RatioCatalog::default();

        for mapping in &config.mappings {
            match Expression::first_of(&mapping.candidates) {
                Some(expression) => catalog.mappings.push(ResolvedMapping {
                    name: mapping.name.clone(),
                    candidates: mapping.candidates.clone(),
                    expression,
                }),
                None => catalog.reject(&mapping.name, "mapping has no candidate columns".to_string()),
            }
        }

        for definition in &config.ratios {
            match Expression::from_json(&definition.expression) {
                Ok(expression) => catalog.ratios.push(CompiledRatio {
                    output: definition.output.clone(),
                    expression,
                }),
                Err(e) => catalog.reject(&definition.output, e.to_string()),
            }
        }

        log::info!(
            "Compiled {} mappings and {} ratios ({} rejected)",
            catalog.mappings.len(),
            catalog.ratios.len(),
            catalog.rejected.len()
        );
        catalog
    }

    fn reject(&mut self, name: &str, reason: String) {
        log::warn!("Skipping definition {}: {}", name, reason);
        self.rejected.push(RejectedDefinition {
            name: name.to_string(),
            reason,
        });
    }

    /// Build a catalog directly from parsed parts
    pub fn from_parts(mappings: Vec<ResolvedMapping>, ratios: Vec<CompiledRatio>) -> Self {
        Self {
            mappings,
            ratios,
            rejected: Vec::new(),
        }
    }

    pub fn mappings(&self) -> &[ResolvedMapping] {
        &self.mappings
    }

    pub fn ratios(&self) -> &[CompiledRatio] {
        &self.ratios
    }

    pub fn rejected(&self) -> &[RejectedDefinition] {
        &self.rejected
    }

    /// Ratio output names without repeats, in declaration order
    pub fn ratio_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.ratios
            .iter()
            .map(|r| r.output.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Raw columns read by some mapping
    pub fn consumed_columns(&self) -> HashSet<&str> {
        self.mappings
            .iter()
            .flat_map(|m| m.candidates.iter().map(String::as_str))
            .collect()
    }

    /// Names produced by mappings
    pub fn mapping_outputs(&self) -> HashSet<&str> {
        self.mappings.iter().map(|m| m.name.as_str()).collect()
    }

    /// Every column a ratio row can carry
    pub fn output_schema(&self, price_column: Option<&str>) -> Vec<(String, SqlType)> {
        let mut schema: Vec<(String, SqlType)> = RATIO_INDEX_COLUMNS
            .iter()
            .map(|c| (c.to_string(), SqlType::Text))
            .collect();
        let mut seen: HashSet<String> = schema.iter().map(|(n, _)| n.clone()).collect();
        let mut push = |name: String| {
            if seen.insert(name.clone()) {
                schema.push((name, SqlType::Real));
            }
        };

        for mapping in &self.mappings {
            push(mapping.name.clone());
        }
        if let Some(price) = price_column {
            push(price.to_string());
        }
        for ratio in self.ratio_names() {
            push(ratio.to_string());
        }
        for ratio in self.ratio_names() {
            for statistic in RollingStatistic::all() {
                push(statistic.column_name(ratio));
            }
        }
        schema
    }
}

impl TryFrom<&RatioConfig> for RatioCatalog {
    type Error = RatioError;

    /// Strict compile: the first malformed definition is an error
    fn try_from(config: &RatioConfig) -> Result<Self, Self::Error> {
        let catalog = Self::compile(config);
        if let Some(rejected) = catalog.rejected.first() {
            return Err(RatioError::InvalidExpression(format!(
                "{}: {}",
                rejected.name, rejected.reason
            )));
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RatioConfig {
        RatioConfig::from_json_str(
            r#"{
                "mappings": [
                    {"name": "netSales", "candidates": ["jppfs_cor:NetSales_CurrentYearDuration", "jppfs_cor:Revenue_CurrentYearDuration"]},
                    {"name": "empty", "candidates": []}
                ],
                "ratios": [
                    {"output": "Ratio_A", "expression": {"column": "netSales"}},
                    {"output": "Ratio_Bad", "expression": {"operator": "^", "operands": [{"value": 1}, {"value": 2}]}},
                    {"output": "Ratio_B", "expression": {"operator": "*", "operands": [{"column": "Ratio_A"}, {"value": 2}]}}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_compile_skips_malformed() {
        let catalog = RatioCatalog::compile(&config());
        assert_eq!(catalog.mappings().len(), 1);
        assert_eq!(catalog.ratio_names(), vec!["Ratio_A", "Ratio_B"]);
        let rejected: Vec<&str> = catalog.rejected().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(rejected, vec!["empty", "Ratio_Bad"]);
    }

    #[test]
    fn test_strict_compile_fails() {
        assert!(RatioCatalog::try_from(&config()).is_err());
    }

    #[test]
    fn test_output_schema() {
        let catalog = RatioCatalog::compile(&config());
        let schema = catalog.output_schema(Some("PerShare_SharePrice"));
        let names: Vec<&str> = schema.iter().map(|(n, _)| n.as_str()).collect();

        assert_eq!(&names[..5], &RATIO_INDEX_COLUMNS);
        assert_eq!(names[5], "netSales");
        assert_eq!(names[6], "PerShare_SharePrice");
        assert_eq!(names[7], "Ratio_A");
        assert!(names.contains(&"Ratio_B_ZScore"));
        // 5 index + 1 mapping + price + 2 ratios + 2 * 11 statistics
        assert_eq!(names.len(), 5 + 1 + 1 + 2 + 22);
    }

    #[test]
    fn test_consumed_columns() {
        let catalog = RatioCatalog::compile(&config());
        assert!(catalog
            .consumed_columns()
            .contains("jppfs_cor:Revenue_CurrentYearDuration"));
        assert!(catalog.mapping_outputs().contains("netSales"));
    }
}
