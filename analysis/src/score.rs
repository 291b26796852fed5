//! Turning measurements and baselines into percentages and 0..=100 scores.
//! Every function yields `None` when the baseline is missing or not positive.

use crate::baseline::QueryBaseline;
use serde::Serialize;

/// deviation (in percent) still earning full marks
pub const FULL_MARKS_DEVIATION: f64 = 10.0;
/// points lost per percent of deviation beyond the full marks band
pub const PENALTY_PER_PERCENT: f64 = 10.0;

pub const MEAN_WEIGHT: f64 = 0.5;
pub const MEDIAN_WEIGHT: f64 = 0.2;
pub const STD_WEIGHT: f64 = 0.2;
pub const RANGE_WEIGHT: f64 = 0.1;

fn positive(baseline: f64) -> Option<f64> {
    (baseline.is_finite() && baseline > 0.0).then_some(baseline)
}

/// Change against the baseline in percent where higher is better, 0 is par
pub fn performance_pct(actual: f64, baseline: f64) -> Option<f64> {
    positive(baseline).map(|baseline| (actual - baseline) * 100.0 / baseline)
}

/// Change against the baseline in percent where lower is better, 0 is par
pub fn performance_pct_reverse(actual: f64, baseline: f64) -> Option<f64> {
    positive(baseline).map(|baseline| (baseline - actual) * 100.0 / baseline)
}

/// absolute deviation from the baseline in percent
pub fn deviation_rate(actual: f64, baseline: f64) -> Option<f64> {
    positive(baseline).map(|baseline| (actual - baseline).abs() * 100.0 / baseline)
}

/// Full marks within the band, then a linear penalty down to zero
pub fn deviation_score(actual: f64, baseline: f64) -> Option<f64> {
    deviation_rate(actual, baseline).map(|rate| {
        if rate < FULL_MARKS_DEVIATION {
            100.0
        } else {
            (100.0 - (rate - FULL_MARKS_DEVIATION) * PENALTY_PER_PERCENT).max(0.0)
        }
    })
}

/// Score of a load speed, faster than the baseline earns full marks
pub fn import_speed_score(actual: f64, baseline: f64) -> Option<f64> {
    positive(baseline).map(|baseline| {
        let ratio = actual / baseline;

        if ratio >= 1.0 {
            100.0
        } else if ratio >= 0.9 {
            90.0 + (ratio - 0.9) * 50.0
        } else {
            (ratio * 100.0).max(0.0)
        }
    })
}

/// Observed statistics of a group of rows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryStats {
    pub mean_ms: f64,
    pub med_ms: f64,
    pub std_ms: f64,
    pub range_ms: f64,
}

/// Composite of the per statistic deviation scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CompositeScore {
    pub comprehensive: f64,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std: Option<f64>,
    pub range: Option<f64>,
}

fn component(actual: f64, baseline: Option<f64>) -> Option<f64> {
    baseline.and_then(|baseline| deviation_score(actual, baseline))
}

/// Weighted composite over the statistics the baseline provides, weights
/// renormalized over what is available. `None` if nothing is comparable.
pub fn composite_query_score(observed: &QueryStats, baseline: &QueryBaseline) -> Option<CompositeScore> {
    let mean = component(observed.mean_ms, baseline.mean_ms);
    let median = component(observed.med_ms, baseline.med_ms);
    let std = component(observed.std_ms, baseline.std_ms);
    let range = component(observed.range_ms, baseline.range_ms);

    let (weighted, weights) = [
        (mean, MEAN_WEIGHT),
        (median, MEDIAN_WEIGHT),
        (std, STD_WEIGHT),
        (range, RANGE_WEIGHT),
    ]
    .into_iter()
    .filter_map(|(score, weight)| score.map(|score| (score * weight, weight)))
    .fold((0.0, 0.0), |(sum, weights), (score, weight)| {
        (sum + score, weights + weight)
    });

    (weights > 0.0).then(|| CompositeScore {
        comprehensive: weighted / weights,
        mean,
        median,
        std,
        range,
    })
}

/// round for display
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
