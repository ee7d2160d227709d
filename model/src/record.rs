//! Per-iteration measurement record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One four-phase measurement cycle at one location.
///
/// Every metric is `None` when its probe failed or produced no parseable samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Time the iteration started
    pub timestamp: DateTime<Utc>,

    /// Location identifier (e.g. "p3")
    pub location: String,

    /// 1-based iteration index within the location
    pub iteration: u32,

    /// Wi-Fi signal strength in dBm
    pub rssi: Option<i32>,

    /// Baseline latency in milliseconds (idle link)
    pub latency_baseline: Option<f64>,

    /// Baseline jitter in milliseconds
    pub jitter_baseline: Option<f64>,

    /// Baseline round-trip samples in milliseconds
    pub ping_baseline_raw: Vec<f64>,

    /// Upload throughput in bits per second
    pub upload_bps: Option<f64>,

    /// Structured output of the upload throughput tool
    pub iperf_upload_raw: Value,

    /// Latency while uploading
    pub latency_upload: Option<f64>,

    /// Jitter while uploading
    pub jitter_upload: Option<f64>,

    /// Round-trip samples collected while uploading
    pub ping_upload_raw: Vec<f64>,

    /// Download throughput in bits per second
    pub download_bps: Option<f64>,

    /// Structured output of the download throughput tool
    pub iperf_download_raw: Value,

    /// Latency while downloading
    pub latency_download: Option<f64>,

    /// Jitter while downloading
    pub jitter_download: Option<f64>,

    /// Round-trip samples collected while downloading
    pub ping_download_raw: Vec<f64>,
}

impl IterationRecord {
    pub fn new(location: impl Into<String>, iteration: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            location: location.into(),
            iteration,
            rssi: None,
            latency_baseline: None,
            jitter_baseline: None,
            ping_baseline_raw: Vec::new(),
            upload_bps: None,
            iperf_upload_raw: Value::Null,
            latency_upload: None,
            jitter_upload: None,
            ping_upload_raw: Vec::new(),
            download_bps: None,
            iperf_download_raw: Value::Null,
            latency_download: None,
            jitter_download: None,
            ping_download_raw: Vec::new(),
        }
    }

    pub fn upload_mbps(&self) -> Option<f64> {
        self.upload_bps.map(|bps| bps / crate::BITS_PER_MBIT)
    }

    pub fn download_mbps(&self) -> Option<f64> {
        self.download_bps.map(|bps| bps / crate::BITS_PER_MBIT)
    }
}
