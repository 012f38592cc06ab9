//! Aggregate CLV reporting.

use serde::Serialize;

/// Closed records needed before a sharp verdict is possible.
pub const SHARP_MIN_RECORDS: usize = 50;
/// Minimum average CLV for a sharp verdict.
pub const SHARP_MIN_AVERAGE: f64 = 0.02;
/// Minimum share of positive-CLV records for a sharp verdict.
pub const SHARP_MIN_POSITIVE_RATE: f64 = 0.60;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClvStats {
    pub total: usize,
    pub average: f64,
    /// Upper median for even-sized samples.
    pub median: f64,
    pub positive_rate: f64,
    pub best: f64,
    pub worst: f64,
}

impl ClvStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let positive = sorted.iter().filter(|v| **v > 0.0).count();

        Self {
            total: n,
            average: sorted.iter().sum::<f64>() / n as f64,
            median: sorted[n / 2],
            positive_rate: positive as f64 / n as f64,
            best: sorted[n - 1],
            worst: sorted[0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharpVerdict {
    pub is_sharp: bool,
    pub stats: ClvStats,
}

impl SharpVerdict {
    pub fn from_stats(stats: ClvStats) -> Self {
        let is_sharp = stats.total >= SHARP_MIN_RECORDS
            && stats.average >= SHARP_MIN_AVERAGE
            && stats.positive_rate >= SHARP_MIN_POSITIVE_RATE;
        Self { is_sharp, stats }
    }

    pub fn label(&self) -> &'static str {
        if self.is_sharp {
            "Sharp"
        } else {
            "Developing"
        }
    }
}
