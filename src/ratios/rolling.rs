//! Trailing multi-year statistics of a ratio series
//!
//! Rows of one entity are in chronological order, one per filing, so a
//! window of `n` rows is read as `n` years.

use crate::types::{finite_or_missing, is_missing, MISSING};
use statrs::statistics::{Data, Distribution};
use std::collections::VecDeque;

/// Trailing windows for moving average and standard deviation
pub const ROLLING_WINDOWS: [usize; 3] = [3, 5, 10];

/// Lookbacks for period-over-period growth
pub const GROWTH_LOOKBACKS: [usize; 4] = [1, 3, 5, 10];

/// Window the z-score is measured against
pub const ZSCORE_WINDOW: usize = 5;

/// One derived statistic column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollingStatistic {
    Average(usize),
    Std(usize),
    Growth(usize),
    ZScore,
}

impl RollingStatistic {
    /// Every statistic in output column order
    pub fn all() -> Vec<RollingStatistic> {
        ROLLING_WINDOWS
            .iter()
            .map(|w| RollingStatistic::Average(*w))
            .chain(ROLLING_WINDOWS.iter().map(|w| RollingStatistic::Std(*w)))
            .chain(GROWTH_LOOKBACKS.iter().map(|p| RollingStatistic::Growth(*p)))
            .chain(std::iter::once(RollingStatistic::ZScore))
            .collect()
    }

    /// Column name for `ratio`, e.g. `Ratio_ROE_5Year_Average`
    pub fn column_name(&self, ratio: &str) -> String {
        match self {
            RollingStatistic::Average(w) => format!("{}_{}Year_Average", ratio, w),
            RollingStatistic::Std(w) => format!("{}_{}Year_Std", ratio, w),
            RollingStatistic::Growth(p) => format!("{}_{}Year_Growth", ratio, p),
            RollingStatistic::ZScore => format!("{}_ZScore", ratio),
        }
    }
}

/// Trailing window that ignores missing values inside it
#[derive(Debug, Clone)]
pub struct RollingWindow {
    window: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(window: usize) -> Self {
        if window == 0 {
            panic!("Window size must be greater than 0");
        }
        Self {
            window,
            values: VecDeque::with_capacity(window),
        }
    }

    /// Push a value and return `(mean, std)` of the observations now in the window
    pub fn update(&mut self, value: f64) -> (f64, f64) {
        self.values.push_back(value);
        if self.values.len() > self.window {
            self.values.pop_front();
        }
        self.current()
    }

    /// Mean and sample std; a single observation has std 0, an empty window yields missing
    pub fn current(&self) -> (f64, f64) {
        let observed: Vec<f64> = self.values.iter().copied().filter(|v| !is_missing(*v)).collect();
        match observed.len() {
            0 => (MISSING, MISSING),
            1 => (observed[0], 0.0),
            _ => {
                // Constant windows are exactly zero-spread; summation noise must not leak into z-scores
                let first = observed[0];
                if observed.iter().all(|v| *v == first) {
                    return (first, 0.0);
                }
                let data = Data::new(observed);
                (
                    data.mean().unwrap_or(MISSING),
                    data.std_dev().unwrap_or(MISSING),
                )
            }
        }
    }
}

/// Moving average and standard deviation over a trailing window
pub fn rolling_mean_std(values: &[f64], window: usize) -> (Vec<f64>, Vec<f64>) {
    let mut rolling = RollingWindow::new(window);
    values.iter().map(|v| rolling.update(*v)).unzip()
}

/// Percentage change against the value `periods` rows earlier; infinite results become missing
pub fn pct_change(values: &[f64], periods: usize) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, current)| {
            if i < periods {
                return MISSING;
            }
            finite_or_missing(current / values[i - periods] - 1.0)
        })
        .collect()
}

/// Standardised deviation from the rolling mean
///
/// Zero spread means the value equals the mean, so the score is 0.
pub fn zscore(values: &[f64], means: &[f64], stds: &[f64]) -> Vec<f64> {
    values
        .iter()
        .zip(means.iter().zip(stds))
        .map(|(v, (mean, std))| {
            if is_missing(*std) || is_missing(*v) {
                MISSING
            } else if *std > 0.0 {
                (v - mean) / std
            } else {
                0.0
            }
        })
        .collect()
}

/// All statistics of one ratio series, in [`RollingStatistic::all`] order
pub fn rolling_statistics(values: &[f64]) -> Vec<(RollingStatistic, Vec<f64>)> {
    // -0.0 compares equal to 0.0 but prints differently; settle it before deriving anything
    let values: Vec<f64> = values.iter().map(|v| if *v == 0.0 { 0.0 } else { *v }).collect();

    let mut averages = Vec::with_capacity(ROLLING_WINDOWS.len());
    let mut stds = Vec::with_capacity(ROLLING_WINDOWS.len());
    let mut zscore_window = None;
    for window in ROLLING_WINDOWS {
        let (mean, std) = rolling_mean_std(&values, window);
        if window == ZSCORE_WINDOW {
            zscore_window = Some((mean.clone(), std.clone()));
        }
        averages.push((RollingStatistic::Average(window), mean));
        stds.push((RollingStatistic::Std(window), std));
    }

    let (z_mean, z_std) =
        zscore_window.unwrap_or_else(|| rolling_mean_std(&values, ZSCORE_WINDOW));

    let mut out = averages;
    out.extend(stds);
    out.extend(
        GROWTH_LOOKBACKS
            .iter()
            .map(|p| (RollingStatistic::Growth(*p), pct_change(&values, *p))),
    );
    out.push((RollingStatistic::ZScore, zscore(&values, &z_mean, &z_std)));
    out
}
