//! Regression summary files

use super::ols::FittedModel;
use super::ols::INTERCEPT;
use crate::error::Result;
use std::fmt;
use std::fs;
use std::path::Path;

/// Render the summary for one model: query, OLS table, significance breakdown
pub fn render_summary(query: &str, model: &FittedModel, alpha: f64) -> String {
    ModelSummary { query, model, alpha }.to_string()
}

struct ModelSummary<'a> {
    query: &'a str,
    model: &'a FittedModel,
    alpha: f64,
}

impl fmt::Display for ModelSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- SQL Query ---")?;
        writeln!(f, "{}\n", self.query.trim())?;

        writeln!(f, "--- OLS Regression Results ---")?;
        writeln!(f, "{}\n", self.model)?;

        writeln!(f, "--- Significance Analysis ---")?;
        writeln!(f, "Significance level (alpha): {}\n", self.alpha)?;

        let significant: Vec<(&str, f64)> = self
            .model
            .pvalues()
            .into_iter()
            .filter(|(_, p)| *p < self.alpha)
            .collect();
        let level = self.alpha * 100.0;

        writeln!(f, "Variables significant at the {:.1}% level:", level)?;
        if significant.is_empty() {
            writeln!(f, "No variables are significant at this level.")?;
        }
        for (name, p) in &significant {
            writeln!(f, "- {} (P-value: {:.4})", name, p)?;
        }
        writeln!(f)?;

        writeln!(f, "Predictor variables significant at the {:.1}% level:", level)?;
        let predictors: Vec<&(&str, f64)> = significant.iter().filter(|(n, _)| *n != INTERCEPT).collect();
        if predictors.is_empty() {
            writeln!(f, "No predictor variables are significant at this level.")?;
        }
        for (name, p) in predictors {
            writeln!(f, "- {} (P-value: {:.4})", name, p)?;
        }
        Ok(())
    }
}

/// Overwrite `path` with `contents`, creating parent directories
pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, contents)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

/// Render and write a model summary
pub fn write_summary(path: &Path, query: &str, model: &FittedModel, alpha: f64) -> Result<()> {
    write_text(path, &render_summary(query, model, alpha))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::ols::{fit_ols, FitError};

    fn fitted() -> FittedModel {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let noise: Vec<f64> = (0..30).map(|i| ((i * 7) % 5) as f64 - 2.0).collect();
        let y: Vec<f64> = x.iter().zip(&noise).map(|(x, e)| 3.0 * x + e).collect();
        let z: Vec<f64> = (0..30).map(|i| ((i * 13) % 7) as f64).collect();
        fit_ols("y", &y, &[("x".to_string(), x), ("z".to_string(), z)]).into()
    }

    #[test]
    fn test_render_sections() {
        let text = render_summary("SELECT y, x FROM t\n", &fitted(), 0.05);
        assert!(text.starts_with("--- SQL Query ---\nSELECT y, x FROM t\n"));
        assert!(text.contains("--- OLS Regression Results ---"));
        assert!(text.contains("Significance level (alpha): 0.05"));
        assert!(text.contains("Variables significant at the 5.0% level:"));
        assert!(text.contains("- x (P-value: 0.0000)"));
    }

    #[test]
    fn test_render_empty_model() {
        let model = FittedModel::Empty(FitError::EmptyDataset);
        let text = render_summary("SELECT 1", &model, 0.01);
        assert!(text.contains("No variables are significant at this level."));
        assert!(text.contains("No predictor variables are significant at this level."));
    }

    #[test]
    fn test_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("summary.txt");
        write_summary(&path, "SELECT 1", &fitted(), 0.05).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("--- Significance Analysis ---"));
    }
}
