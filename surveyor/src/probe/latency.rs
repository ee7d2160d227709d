//! Ping-based latency probing

use super::{run_captured, ProbeError, ToolCommand};
use regex::Regex;
use std::process::ExitStatus;
use std::sync::LazyLock;
use std::time::Duration;
use survey_model::summary::{jitter, mean};
use tracing::debug;

/// Extra time granted to the ping process beyond its own deadline
const DEADLINE_SLACK: Duration = Duration::from_secs(2);

static RTT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=([\d.]+)\s*ms").expect("valid RTT pattern"));

/// Latency, jitter and the raw round-trip samples they came from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyStats {
    pub latency_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub samples: Vec<f64>,
}

impl LatencyStats {
    pub fn from_samples(samples: Vec<f64>) -> Self {
        Self {
            latency_ms: mean(&samples),
            jitter_ms: jitter(&samples),
            samples,
        }
    }
}

/// Extract every `time=<ms> ms` marker from ping output
pub fn parse_rtt_samples(text: &str) -> Vec<f64> {
    RTT_MARKER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}

/// Turn ping output into latency statistics.
///
/// Output without a single sample is a failure: a non-zero `status` explains it, otherwise the
/// output is considered malformed.
pub fn parse_ping_output(tool: &str, stdout: &str, status: Option<ExitStatus>) -> Result<LatencyStats, ProbeError> {
    let samples = parse_rtt_samples(stdout);
    if !samples.is_empty() {
        return Ok(LatencyStats::from_samples(samples));
    }

    match status {
        Some(status) if !status.success() => Err(ProbeError::NonZeroExit {
            tool: tool.to_string(),
            status,
            stderr: super::excerpt(stdout.as_bytes()),
        }),
        _ => Err(ProbeError::Malformed {
            tool: tool.to_string(),
            detail: "no round-trip samples".to_string(),
        }),
    }
}

pub struct LatencyProbe {
    tool: ToolCommand,
    interval: String,
}

impl LatencyProbe {
    pub fn new(tool: ToolCommand, interval: String) -> Self {
        Self { tool, interval }
    }

    pub fn tool(&self) -> &ToolCommand {
        &self.tool
    }

    /// Ping `host` until `deadline` elapses
    pub async fn baseline(&self, host: &str, deadline: Duration) -> Result<LatencyStats, ProbeError> {
        let args = vec![
            "-w".to_string(),
            deadline.as_secs().max(1).to_string(),
            "-i".to_string(),
            self.interval.clone(),
            host.to_string(),
        ];

        let output = run_captured(&self.tool, &args, deadline.saturating_add(DEADLINE_SLACK)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("Baseline ping output: {} bytes", stdout.len());

        parse_ping_output(self.tool.name(), &stdout, Some(output.status))
    }

    /// Arguments for an open-ended ping that runs until it is terminated
    pub fn continuous_args(&self, host: &str) -> Vec<String> {
        vec!["-i".to_string(), self.interval.clone(), host.to_string()]
    }
}
