use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// population variance, 0 for an empty slice
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// population standard deviation
pub fn std(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// median, 0 for an empty slice
///
/// # Examples
///
/// ```
/// use spcore::algorithm::stats::median;
///
/// assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
/// assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
/// ```
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<OrderedFloat<f64>> = values.iter().map(|v| OrderedFloat(*v)).collect();
    sorted.sort();
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2].0
    } else {
        (sorted[n / 2 - 1].0 + sorted[n / 2].0) / 2.0
    }
}

pub fn min(values: &[f64]) -> f64 {
    values.iter().copied().map(OrderedFloat).min().map(|v| v.0).unwrap_or(0.0)
}

pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().map(OrderedFloat).max().map(|v| v.0).unwrap_or(0.0)
}

/// mean of the values strictly below `limit`, `None` when there are none
pub fn mean_below(values: &[f64], limit: f64) -> Option<f64> {
    let (sum, n) = values
        .iter()
        .filter(|v| **v < limit)
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// mean of the strictly positive values, 0 when there are none
pub fn mean_positive(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| **v > 0.0)
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Descriptive statistics of a counts series and its counts-per-second view.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub points: usize,
    pub total_counts: f64,
    pub mean_counts: f64,
    pub std_counts: f64,
    pub min_counts: f64,
    pub max_counts: f64,
    pub mean_cps: f64,
    pub std_cps: f64,
    pub min_cps: f64,
    pub max_cps: f64,
    pub median_cps: f64,
    /// relative standard deviation in percent, 0 when the mean is 0
    pub rsd_percent: f64,
}

impl SummaryStats {
    pub fn from_counts(counts: &[f64], dwell_time: f64) -> Self {
        if counts.is_empty() || !(dwell_time > 0.0) {
            return SummaryStats::default();
        }
        let cps: Vec<f64> = counts.iter().map(|c| c / dwell_time).collect();
        let mean_cps = mean(&cps);
        let std_cps = std(&cps);
        SummaryStats {
            points: counts.len(),
            total_counts: counts.iter().sum(),
            mean_counts: mean(counts),
            std_counts: std(counts),
            min_counts: min(counts),
            max_counts: max(counts),
            mean_cps,
            std_cps,
            min_cps: min(&cps),
            max_cps: max(&cps),
            median_cps: median(&cps),
            rsd_percent: if mean_cps > 0.0 { std_cps / mean_cps * 100.0 } else { 0.0 },
        }
    }
}
