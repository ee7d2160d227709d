//! Per-location statistics

use crate::record::IterationRecord;
use crate::P95_FRACTION;
use serde::{Deserialize, Serialize};

/// Reduced statistics for one metric at one location.
///
/// All derived values are `None` (and `samples` is 0) when there was nothing to reduce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub p95: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub samples: usize,
}

impl MetricSummary {
    /// Reduce a sample list, rounding every derived value to two decimals
    pub fn from_samples(values: &[f64]) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return Self::default();
        }

        sorted.sort_by(f64::total_cmp);

        Self {
            mean: mean(&sorted).map(round2),
            median: median_sorted(&sorted).map(round2),
            p95: p95_sorted(&sorted).map(round2),
            min: sorted.first().copied().map(round2),
            max: sorted.last().copied().map(round2),
            samples: sorted.len(),
        }
    }
}

/// Summary of every tracked metric for one location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationSummary {
    pub rssi: MetricSummary,
    pub latency_baseline: MetricSummary,
    pub jitter_baseline: MetricSummary,
    pub latency_upload: MetricSummary,
    pub jitter_upload: MetricSummary,
    pub latency_download: MetricSummary,
    pub jitter_download: MetricSummary,
    pub upload_mbps: MetricSummary,
    pub download_mbps: MetricSummary,
}

impl LocationSummary {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a IterationRecord>,
    {
        let records: Vec<&IterationRecord> = records.into_iter().collect();
        let collect = |f: fn(&IterationRecord) -> Option<f64>| -> Vec<f64> {
            records.iter().filter_map(|r| f(r)).collect()
        };

        Self {
            rssi: MetricSummary::from_samples(&collect(|r| r.rssi.map(f64::from))),
            latency_baseline: MetricSummary::from_samples(&collect(|r| r.latency_baseline)),
            jitter_baseline: MetricSummary::from_samples(&collect(|r| r.jitter_baseline)),
            latency_upload: MetricSummary::from_samples(&collect(|r| r.latency_upload)),
            jitter_upload: MetricSummary::from_samples(&collect(|r| r.jitter_upload)),
            latency_download: MetricSummary::from_samples(&collect(|r| r.latency_download)),
            jitter_download: MetricSummary::from_samples(&collect(|r| r.jitter_download)),
            upload_mbps: MetricSummary::from_samples(&collect(IterationRecord::upload_mbps)),
            download_mbps: MetricSummary::from_samples(&collect(IterationRecord::download_mbps)),
        }
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of an already sorted slice (average of the two middle values for even lengths)
pub fn median_sorted(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Nearest-rank style p95 of an already sorted slice
pub fn p95_sorted(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (sorted.len() as f64 * P95_FRACTION) as usize;
    sorted.get(idx.min(sorted.len() - 1)).copied()
}

/// Mean absolute difference between consecutive samples
pub fn jitter(samples: &[f64]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let diffs: Vec<f64> = samples.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    mean(&diffs)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
