//! Ordinary least squares with an intercept
//!
//! Regressors are centred and scaled before the least-squares problem is solved
//! by SVD, then estimates and their covariance are mapped back to the original units.
//! Inference follows the classical homoskedastic OLS formulas.

use nalgebra::{DMatrix, DVector, SVD};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};
use std::fmt;
use thiserror::Error;

/// Name of the intercept term
pub const INTERCEPT: &str = "const";

/// Smallest singular value, relative to the largest, of an identifiable design
const SINGULAR_TOLERANCE: f64 = 1e-10;

/// Why a model could not be fitted
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("no observations left after cleaning")]
    EmptyDataset,

    #[error("{observations} observations cannot identify {parameters} parameters")]
    InsufficientObservations { observations: usize, parameters: usize },

    #[error("regressor {regressor} has {actual} rows, expected {expected}")]
    DimensionMismatch {
        regressor: String,
        expected: usize,
        actual: usize,
    },

    #[error("design matrix is singular")]
    SingularMatrix,

    #[error("dependent variable is constant")]
    ConstantResponse,

    #[error("column not in result set: {0}")]
    MissingColumn(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// Estimate and inference for one term
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
    pub p_value: f64,
    pub conf_low: f64,
    pub conf_high: f64,
}

/// A fitted OLS model
#[derive(Debug, Clone, PartialEq)]
pub struct OlsResults {
    pub dependent: String,
    /// Intercept first, then regressors in input order
    pub coefficients: Vec<Coefficient>,
    pub nobs: usize,
    pub df_model: usize,
    pub df_resid: usize,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub f_statistic: f64,
    pub f_pvalue: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub ssr: f64,
}

impl OlsResults {
    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    pub fn coef(&self, name: &str) -> Option<f64> {
        self.coefficient(name).map(|c| c.estimate)
    }

    pub fn pvalue(&self, name: &str) -> Option<f64> {
        self.coefficient(name).map(|c| c.p_value)
    }

    /// Terms with p-value below `alpha`, intercept included
    pub fn significant_terms(&self, alpha: f64) -> Vec<&Coefficient> {
        self.coefficients.iter().filter(|c| c.p_value < alpha).collect()
    }
}

/// Fit `y ~ const + regressors`
pub fn fit_ols(
    dependent: &str,
    y: &[f64],
    regressors: &[(String, Vec<f64>)],
) -> Result<OlsResults, FitError> {
    let n = y.len();
    let k = regressors.len() + 1;
    if n == 0 {
        return Err(FitError::EmptyDataset);
    }
    if n <= k {
        return Err(FitError::InsufficientObservations {
            observations: n,
            parameters: k,
        });
    }
    for (name, values) in regressors {
        if values.len() != n {
            return Err(FitError::DimensionMismatch {
                regressor: name.clone(),
                expected: n,
                actual: values.len(),
            });
        }
    }
    if y.iter().all(|v| *v == y[0]) {
        return Err(FitError::ConstantResponse);
    }

    // Standardised design: intercept column of ones, regressors as (x - mean) / sd
    let mut centres = Vec::with_capacity(k - 1);
    let mut scales = Vec::with_capacity(k - 1);
    for (_, values) in regressors {
        let mean = values.iter().sum::<f64>() / n as f64;
        let sd = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
        if !(sd > 0.0) || !sd.is_finite() {
            return Err(FitError::SingularMatrix);
        }
        centres.push(mean);
        scales.push(sd);
    }
    let design = DMatrix::from_fn(n, k, |row, col| match col {
        0 => 1.0,
        j => (regressors[j - 1].1[row] - centres[j - 1]) / scales[j - 1],
    });
    let response = DVector::from_column_slice(y);

    let svd = SVD::new(design.clone(), true, true);
    let largest = svd.singular_values.max();
    if !(svd.singular_values.min() > largest * SINGULAR_TOLERANCE) {
        return Err(FitError::SingularMatrix);
    }
    let v_t = svd.v_t.as_ref().ok_or(FitError::SingularMatrix)?;
    let beta_std = svd
        .solve(&response, largest * SINGULAR_TOLERANCE)
        .map_err(|_| FitError::SingularMatrix)?;
    // (X'X)^-1 = V S^-2 V'
    let inverse_sq = DMatrix::from_diagonal(&svd.singular_values.map(|s| 1.0 / (s * s)));
    let xtx_inverse = v_t.transpose() * inverse_sq * v_t;

    let ssr = (&response - &design * &beta_std).norm_squared();
    let y_mean = response.mean();
    let tss: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();

    let df_model = k - 1;
    let df_resid = n - k;
    let sigma2 = ssr / df_resid as f64;

    // beta = T * beta_std, with T undoing the centring and scaling
    let mut transform = DMatrix::<f64>::zeros(k, k);
    transform[(0, 0)] = 1.0;
    for j in 1..k {
        transform[(0, j)] = -centres[j - 1] / scales[j - 1];
        transform[(j, j)] = 1.0 / scales[j - 1];
    }
    let beta = &transform * &beta_std;
    let cov = &transform * (xtx_inverse * sigma2) * transform.transpose();

    let t_dist = StudentsT::new(0.0, 1.0, df_resid as f64).ok();
    let t_crit = t_dist
        .as_ref()
        .map(|d| d.inverse_cdf(0.975))
        .unwrap_or(f64::NAN);

    let names = std::iter::once(INTERCEPT.to_string()).chain(regressors.iter().map(|(n, _)| n.clone()));
    let coefficients = names
        .enumerate()
        .map(|(i, name)| {
            let estimate = beta[i];
            let std_error = cov[(i, i)].max(0.0).sqrt();
            let t_value = estimate / std_error;
            Coefficient {
                name,
                estimate,
                std_error,
                t_value,
                p_value: two_sided_pvalue(t_dist.as_ref(), t_value),
                conf_low: estimate - t_crit * std_error,
                conf_high: estimate + t_crit * std_error,
            }
        })
        .collect();

    let r_squared = 1.0 - ssr / tss;
    let adj_r_squared = 1.0 - (n - 1) as f64 / df_resid as f64 * (1.0 - r_squared);
    let f_statistic = ((tss - ssr) / df_model as f64) / sigma2;
    let f_pvalue = if f_statistic.is_nan() {
        f64::NAN
    } else if f_statistic.is_infinite() {
        0.0
    } else {
        FisherSnedecor::new(df_model as f64, df_resid as f64)
            .map(|d| 1.0 - d.cdf(f_statistic.max(0.0)))
            .unwrap_or(f64::NAN)
    };

    let nf = n as f64;
    let log_likelihood = -nf / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (ssr / nf).ln() + 1.0);
    let aic = -2.0 * log_likelihood + 2.0 * k as f64;
    let bic = -2.0 * log_likelihood + k as f64 * nf.ln();

    Ok(OlsResults {
        dependent: dependent.to_string(),
        coefficients,
        nobs: n,
        df_model,
        df_resid,
        r_squared,
        adj_r_squared,
        f_statistic,
        f_pvalue,
        log_likelihood,
        aic,
        bic,
        ssr,
    })
}

fn two_sided_pvalue(dist: Option<&StudentsT>, t: f64) -> f64 {
    match dist {
        _ if t.is_nan() => f64::NAN,
        _ if t.is_infinite() => 0.0,
        Some(d) => (2.0 * d.cdf(-t.abs())).min(1.0),
        None => f64::NAN,
    }
}

impl fmt::Display for OlsResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(78);
        let thin = "-".repeat(78);
        writeln!(f, "{:^78}", "OLS Regression Results")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "{:<20}{:>19}   {:<20}{:>16.4}", "Dep. Variable:", self.dependent, "R-squared:", self.r_squared)?;
        writeln!(f, "{:<20}{:>19}   {:<20}{:>16.4}", "Model:", "OLS", "Adj. R-squared:", self.adj_r_squared)?;
        writeln!(f, "{:<20}{:>19}   {:<20}{:>16.4}", "Method:", "Least Squares", "F-statistic:", self.f_statistic)?;
        writeln!(f, "{:<20}{:>19}   {:<20}{:>16.4e}", "No. Observations:", self.nobs, "Prob (F-statistic):", self.f_pvalue)?;
        writeln!(f, "{:<20}{:>19}   {:<20}{:>16.4}", "Df Residuals:", self.df_resid, "Log-Likelihood:", self.log_likelihood)?;
        writeln!(f, "{:<20}{:>19}   {:<20}{:>16.4}", "Df Model:", self.df_model, "AIC:", self.aic)?;
        writeln!(f, "{:<20}{:>19}   {:<20}{:>16.4}", "Covariance Type:", "nonrobust", "BIC:", self.bic)?;
        writeln!(f, "{}", rule)?;
        writeln!(
            f,
            "{:<24}{:>10}{:>10}{:>9}{:>9}{:>8}{:>8}",
            "", "coef", "std err", "t", "P>|t|", "[0.025", "0.975]"
        )?;
        writeln!(f, "{}", thin)?;
        for c in &self.coefficients {
            writeln!(
                f,
                "{:<24}{:>10.4}{:>10.4}{:>9.3}{:>9.3}{:>8.3}{:>8.3}",
                truncate(&c.name, 23),
                c.estimate,
                c.std_error,
                c.t_value,
                c.p_value,
                c.conf_low,
                c.conf_high
            )?;
        }
        write!(f, "{}", rule)
    }
}

fn truncate(name: &str, width: usize) -> String {
    if name.chars().count() <= width {
        name.to_string()
    } else {
        name.chars().take(width).collect()
    }
}

/// Outcome of a model fit; an empty model still answers every accessor
#[derive(Debug, Clone, PartialEq)]
pub enum FittedModel {
    Fitted(OlsResults),
    Empty(FitError),
}

impl FittedModel {
    pub fn is_fitted(&self) -> bool {
        matches!(self, FittedModel::Fitted(_))
    }

    /// Observations used; 0 for an empty model
    pub fn nobs(&self) -> usize {
        match self {
            FittedModel::Fitted(r) => r.nobs,
            FittedModel::Empty(_) => 0,
        }
    }

    pub fn rsquared(&self) -> f64 {
        match self {
            FittedModel::Fitted(r) => r.r_squared,
            FittedModel::Empty(_) => f64::NAN,
        }
    }

    pub fn rsquared_adj(&self) -> f64 {
        match self {
            FittedModel::Fitted(r) => r.adj_r_squared,
            FittedModel::Empty(_) => f64::NAN,
        }
    }

    /// (term, p-value) pairs; empty for an empty model
    pub fn pvalues(&self) -> Vec<(&str, f64)> {
        match self {
            FittedModel::Fitted(r) => r
                .coefficients
                .iter()
                .map(|c| (c.name.as_str(), c.p_value))
                .collect(),
            FittedModel::Empty(_) => Vec::new(),
        }
    }

    /// (term, estimate) pairs; empty for an empty model
    pub fn params(&self) -> Vec<(&str, f64)> {
        match self {
            FittedModel::Fitted(r) => r
                .coefficients
                .iter()
                .map(|c| (c.name.as_str(), c.estimate))
                .collect(),
            FittedModel::Empty(_) => Vec::new(),
        }
    }

    pub fn results(&self) -> Option<&OlsResults> {
        match self {
            FittedModel::Fitted(r) => Some(r),
            FittedModel::Empty(_) => None,
        }
    }

    pub fn error(&self) -> Option<&FitError> {
        match self {
            FittedModel::Fitted(_) => None,
            FittedModel::Empty(e) => Some(e),
        }
    }
}

impl From<Result<OlsResults, FitError>> for FittedModel {
    fn from(result: Result<OlsResults, FitError>) -> Self {
        match result {
            Ok(results) => FittedModel::Fitted(results),
            Err(e) => FittedModel::Empty(e),
        }
    }
}

impl fmt::Display for FittedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FittedModel::Fitted(r) => write!(f, "{}", r),
            FittedModel::Empty(e) => write!(f, "Empty model: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn regressor(name: &str, values: &[f64]) -> (String, Vec<f64>) {
        (name.to_string(), values.to_vec())
    }

    #[test]
    fn test_simple_regression() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.1, 3.9, 6.2, 7.8, 10.1];
        let results = fit_ols("y", &y, &[regressor("x", &x)]).unwrap();

        assert_eq!(results.nobs, 5);
        assert_eq!(results.df_resid, 3);
        assert_relative_eq!(results.coef("x").unwrap(), 1.99, epsilon = 1e-10);
        assert_relative_eq!(results.coef(INTERCEPT).unwrap(), 0.05, epsilon = 1e-10);
        assert!(results.r_squared > 0.99);
        assert!(results.pvalue("x").unwrap() < 0.001);
        let x_coef = results.coefficient("x").unwrap();
        assert!(x_coef.conf_low < 1.99 && x_coef.conf_high > 1.99);
    }

    #[test]
    fn test_exact_fit_statistics() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.5, 4.5, 7.0];
        let results = fit_ols("y", &y, &[regressor("x", &x)]).unwrap();

        assert_relative_eq!(results.coef("x").unwrap(), 1.9, epsilon = 1e-10);
        assert_relative_eq!(results.coef(INTERCEPT).unwrap(), 1.15, epsilon = 1e-10);
        assert_relative_eq!(results.ssr, 0.45, epsilon = 1e-10);
        // se(slope) = sqrt(sigma2 / Sxx) with sigma2 = 0.45 / 2 and Sxx = 5
        assert_relative_eq!(
            results.coefficient("x").unwrap().std_error,
            (0.225f64 / 5.0).sqrt(),
            epsilon = 1e-10
        );
        assert_relative_eq!(results.r_squared, 1.0 - 0.45 / 18.5, epsilon = 1e-10);
    }

    #[test]
    fn test_two_regressors() {
        let x1 = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x2 = [2.0, 1.0, 4.0, 3.0, 6.0, 5.0];
        let y: Vec<f64> = x1.iter().zip(&x2).map(|(a, b)| 1.0 + 0.5 * a - 2.0 * b).collect();
        let mut y_noisy = y.clone();
        y_noisy[0] += 0.01;
        let results = fit_ols("y", &y_noisy, &[regressor("a", &x1), regressor("b", &x2)]).unwrap();
        assert_relative_eq!(results.coef("a").unwrap(), 0.5, epsilon = 0.01);
        assert_relative_eq!(results.coef("b").unwrap(), -2.0, epsilon = 0.01);
        assert_eq!(results.df_model, 2);
    }

    #[test]
    fn test_singular_design() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let doubled: Vec<f64> = x.iter().map(|v| v * 2.0).collect();
        let y = [1.0, 3.0, 2.0, 5.0];
        assert_eq!(
            fit_ols("y", &y, &[regressor("x", &x), regressor("x2", &doubled)]),
            Err(FitError::SingularMatrix)
        );
        assert_eq!(
            fit_ols("y", &y, &[regressor("c", &[7.0; 4])]),
            Err(FitError::SingularMatrix)
        );
    }

    #[test]
    fn test_affine_copy_is_singular() {
        let x = [1.0, 2.0, 4.0, 7.0, 11.0];
        let shifted: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        let y = [2.0, 1.0, 5.0, 4.0, 9.0];
        assert_eq!(
            fit_ols("y", &y, &[regressor("x", &x), regressor("x3", &shifted)]),
            Err(FitError::SingularMatrix)
        );
    }

    #[test]
    fn test_two_regressor_covariance() {
        // Orthogonal centred regressors: se(b_j) = sqrt(sigma2 / sum(x_j^2))
        let x1 = [-1.0, 1.0, -1.0, 1.0, -1.0, 1.0];
        let x2 = [-1.0, -1.0, 1.0, 1.0, 0.0, 0.0];
        let y = [1.0, 3.0, 2.0, 5.0, 2.0, 3.5];
        let results = fit_ols("y", &y, &[regressor("a", &x1), regressor("b", &x2)]).unwrap();

        let sigma2 = results.ssr / results.df_resid as f64;
        assert_relative_eq!(results.coef(INTERCEPT).unwrap(), 16.5 / 6.0, epsilon = 1e-10);
        assert_relative_eq!(results.coef("a").unwrap(), 6.5 / 6.0, epsilon = 1e-10);
        assert_relative_eq!(results.coef("b").unwrap(), 3.0 / 4.0, epsilon = 1e-10);
        assert_relative_eq!(
            results.coefficient("a").unwrap().std_error,
            (sigma2 / 6.0).sqrt(),
            epsilon = 1e-10
        );
        assert_relative_eq!(
            results.coefficient("b").unwrap().std_error,
            (sigma2 / 4.0).sqrt(),
            epsilon = 1e-10
        );
        assert_relative_eq!(
            results.coefficient(INTERCEPT).unwrap().std_error,
            (sigma2 / 6.0).sqrt(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(fit_ols("y", &[], &[]), Err(FitError::EmptyDataset));
        assert!(matches!(
            fit_ols("y", &[1.0, 2.0], &[regressor("x", &[1.0, 2.0])]),
            Err(FitError::InsufficientObservations { .. })
        ));
        assert_eq!(
            fit_ols("y", &[3.0, 3.0, 3.0], &[regressor("x", &[1.0, 2.0, 4.0])]),
            Err(FitError::ConstantResponse)
        );
    }

    #[test]
    fn test_empty_model_accessors() {
        let model = FittedModel::from(fit_ols("y", &[], &[]));
        assert!(!model.is_fitted());
        assert_eq!(model.nobs(), 0);
        assert!(model.rsquared().is_nan());
        assert!(model.pvalues().is_empty());
        assert_eq!(model.error(), Some(&FitError::EmptyDataset));
    }

    #[test]
    fn test_summary_contains_terms() {
        let results = fit_ols("Ratio_ROE", &[1.0, 2.0, 2.5, 4.5], &[regressor("Ratio_Debt", &[1.0, 2.0, 3.0, 4.0])]).unwrap();
        let text = results.to_string();
        assert!(text.contains("OLS Regression Results"));
        assert!(text.contains("Ratio_ROE"));
        assert!(text.contains("Ratio_Debt"));
        assert!(text.contains(INTERCEPT));
    }
}
