//! iperf3 throughput testing

use super::{excerpt, run_captured, ProbeError, ToolCommand};
use serde_json::Value;
use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    /// Summary section of the iperf3 report holding the achieved rate
    fn summary_key(self) -> &'static str {
        match self {
            Direction::Upload => "sum_sent",
            Direction::Download => "sum_received",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("Upload"),
            Direction::Download => f.write_str("Download"),
        }
    }
}

/// Outcome of one throughput test.
///
/// `raw` holds whatever structured output the tool produced, including error reports, and is
/// `Value::Null` when there was nothing parseable.
#[derive(Debug)]
pub struct ThroughputRun {
    pub raw: Value,
    pub bits_per_second: Result<f64, ProbeError>,
}

impl ThroughputRun {
    pub fn failed(err: ProbeError) -> Self {
        Self {
            raw: Value::Null,
            bits_per_second: Err(err),
        }
    }
}

/// Interpret iperf3 `--json` output for `direction`
pub fn parse_iperf_output(tool: &str, stdout: &str, direction: Direction, status: Option<ExitStatus>) -> ThroughputRun {
    let raw: Value = match serde_json::from_str(stdout) {
        Ok(raw) => raw,
        Err(e) => {
            let err = match status {
                Some(status) if !status.success() => ProbeError::NonZeroExit {
                    tool: tool.to_string(),
                    status,
                    stderr: excerpt(stdout.as_bytes()),
                },
                _ => ProbeError::Malformed {
                    tool: tool.to_string(),
                    detail: format!("invalid JSON ({}): {}", e, excerpt(stdout.as_bytes())),
                },
            };
            return ThroughputRun::failed(err);
        }
    };

    if let Some(message) = raw.get("error") {
        let message = message.as_str().map(str::to_string).unwrap_or_else(|| message.to_string());
        return ThroughputRun {
            raw,
            bits_per_second: Err(ProbeError::Reported {
                tool: tool.to_string(),
                message,
            }),
        };
    }

    let rate = raw
        .get("end")
        .and_then(|end| end.get(direction.summary_key()))
        .and_then(|sum| sum.get("bits_per_second"))
        .and_then(Value::as_f64)
        .filter(|bps| bps.is_finite());

    let bits_per_second = rate.ok_or_else(|| ProbeError::Malformed {
        tool: tool.to_string(),
        detail: format!("no end.{}.bits_per_second", direction.summary_key()),
    });

    ThroughputRun { raw, bits_per_second }
}

pub struct ThroughputProbe {
    tool: ToolCommand,
    grace: Duration,
}

impl ThroughputProbe {
    pub fn new(tool: ToolCommand, grace: Duration) -> Self {
        Self { tool, grace }
    }

    pub fn tool(&self) -> &ToolCommand {
        &self.tool
    }

    /// Run a `duration` long test against `host`; blocks until the tool exits or times out
    pub async fn run(&self, host: &str, duration: Duration, direction: Direction) -> ThroughputRun {
        let mut args = vec![
            "-c".to_string(),
            host.to_string(),
            "-t".to_string(),
            duration.as_secs().to_string(),
            "--json".to_string(),
        ];
        if direction == Direction::Download {
            args.push("-R".to_string());
        }

        let output = match run_captured(&self.tool, &args, duration.saturating_add(self.grace)).await {
            Ok(output) => output,
            Err(e) => return ThroughputRun::failed(e),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("{} {} output: {} bytes", self.tool.name(), direction, stdout.len());

        parse_iperf_output(self.tool.name(), &stdout, direction, Some(output.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "start": { "connected": [], "test_start": { "protocol": "TCP", "duration": 10 } },
        "intervals": [],
        "end": {
            "sum_sent": { "seconds": 10.0, "bytes": 118750000, "bits_per_second": 95000000.0 },
            "sum_received": { "seconds": 10.0, "bytes": 117500000, "bits_per_second": 94000000.5 }
        }
    }"#;

    #[test]
    fn test_upload_reads_sum_sent() {
        let run = parse_iperf_output("iperf3", REPORT, Direction::Upload, None);
        assert_eq!(run.bits_per_second.unwrap(), 95_000_000.0);
        assert!(run.raw.get("end").is_some());
    }

    #[test]
    fn test_download_reads_sum_received() {
        let run = parse_iperf_output("iperf3", REPORT, Direction::Download, None);
        assert_eq!(run.bits_per_second.unwrap(), 94_000_000.5);
    }

    #[test]
    fn test_embedded_error_keeps_raw() {
        let out = r#"{"start": {}, "intervals": [], "end": {}, "error": "unable to connect to server: Connection refused"}"#;
        let run = parse_iperf_output("iperf3", out, Direction::Upload, None);
        match run.bits_per_second {
            Err(ProbeError::Reported { message, .. }) => assert!(message.contains("Connection refused")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(run.raw["error"], "unable to connect to server: Connection refused");
    }

    #[test]
    fn test_missing_rate_is_malformed() {
        let run = parse_iperf_output("iperf3", r#"{"end": {"sum_sent": {}}}"#, Direction::Upload, None);
        assert!(matches!(run.bits_per_second, Err(ProbeError::Malformed { .. })));
    }

    #[test]
    fn test_garbage_output() {
        let run = parse_iperf_output("iperf3", "iperf3: parameter error", Direction::Upload, None);
        assert!(matches!(run.bits_per_second, Err(ProbeError::Malformed { .. })));
        assert_eq!(run.raw, Value::Null);
    }

    #[cfg(unix)]
    #[test]
    fn test_garbage_output_with_failure_status() {
        use std::os::unix::process::ExitStatusExt;

        let status = ExitStatus::from_raw(1 << 8);
        let run = parse_iperf_output("iperf3", "", Direction::Download, Some(status));
        assert!(matches!(run.bits_per_second, Err(ProbeError::NonZeroExit { .. })));
    }
}
