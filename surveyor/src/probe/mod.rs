//! External measurement tools
//!
//! Each adapter runs one tool as a child process and turns its output into a typed value or
//! a [`ProbeError`]. Adapters never decide what a failure means for the run; the runner does.

mod coordinator;
mod latency;
mod process;
mod signal;
mod throughput;

pub use coordinator::{measure_under_load, LoadedMeasurement};
pub use latency::{parse_ping_output, parse_rtt_samples, LatencyProbe, LatencyStats};
pub use process::ScopedProcess;
pub use signal::{parse_signal_output, SignalProbe};
pub use throughput::{parse_iperf_output, Direction, ThroughputProbe, ThroughputRun};

use crate::config::Config;
use async_trait::async_trait;
use std::io;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Longest slice of tool output kept in error messages
const MAX_ERROR_OUTPUT: usize = 200;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("`{tool}` not found, is it installed?")]
    MissingBinary { tool: String },

    #[error("`{tool}` timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error("`{tool}` failed ({status}): {stderr}")]
    NonZeroExit {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Malformed output from `{tool}`: {detail}")]
    Malformed { tool: String, detail: String },

    #[error("`{tool}` reported an error: {message}")]
    Reported { tool: String, message: String },

    #[error("`{tool}` skipped: {reason}")]
    Skipped { tool: String, reason: String },

    #[error("Failed to run `{tool}`: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },
}

impl ProbeError {
    pub fn is_missing_binary(&self) -> bool {
        matches!(self, ProbeError::MissingBinary { .. })
    }

    pub(crate) fn from_spawn(tool: &ToolCommand, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            ProbeError::MissingBinary {
                tool: tool.name().to_string(),
            }
        } else {
            ProbeError::Spawn {
                tool: tool.name().to_string(),
                source: err,
            }
        }
    }
}

/// A configured tool command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    /// Split a command line on whitespace: program first, then leading arguments
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words.next().unwrap_or_default();
        Self {
            program,
            args: words.collect(),
        }
    }

    /// Program name used in logs and error messages
    pub fn name(&self) -> &str {
        self.program.rsplit('/').next().unwrap_or(&self.program)
    }

    /// Build a command with stdin closed and kill-on-drop enabled
    pub fn command<I, S>(&self, extra: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(extra)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

/// Run a tool to completion, capturing stdout and stderr.
///
/// The child is killed if `timeout` elapses first. A non-zero exit is not an error here;
/// the caller decides whether the output is still usable.
pub async fn run_captured(tool: &ToolCommand, args: &[String], timeout: Duration) -> Result<Output, ProbeError> {
    let mut cmd = tool.command(args);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("Running {} {:?}", tool.name(), args);
    let child = cmd.spawn().map_err(|e| ProbeError::from_spawn(tool, e))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(ProbeError::Spawn {
            tool: tool.name().to_string(),
            source: e,
        }),
        Err(_) => Err(ProbeError::Timeout {
            tool: tool.name().to_string(),
            after: timeout,
        }),
    }
}

/// Trimmed, bounded excerpt of tool output for error messages
pub(crate) fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().nth(MAX_ERROR_OUTPUT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// The measurements a survey iteration needs
#[async_trait]
pub trait Probes: Send + Sync + 'static {
    /// One-shot signal strength query in dBm
    async fn signal(&self) -> Result<i32, ProbeError>;

    /// Fixed-deadline ping burst against an idle link
    async fn baseline_latency(&self, host: &str) -> Result<LatencyStats, ProbeError>;

    /// Throughput test in one direction with a concurrent ping
    async fn under_load(&self, host: &str, duration: Duration, direction: Direction) -> LoadedMeasurement;
}

/// Probes backed by the real external tools
pub struct SystemProbes {
    signal: SignalProbe,
    latency: LatencyProbe,
    throughput: ThroughputProbe,
    baseline_deadline: Duration,
    teardown: Duration,
}

impl SystemProbes {
    pub fn from_config(config: &Config) -> Self {
        let timing = &config.timing;
        Self {
            signal: SignalProbe::new(ToolCommand::parse(&config.tools.signal), timing.signal_timeout()),
            latency: LatencyProbe::new(ToolCommand::parse(&config.tools.ping), timing.ping_interval_arg()),
            throughput: ThroughputProbe::new(
                ToolCommand::parse(&config.tools.iperf3),
                Duration::from_secs(timing.throughput_grace_s),
            ),
            baseline_deadline: Duration::from_secs(timing.baseline_deadline_s),
            teardown: timing.probe_teardown(),
        }
    }
}

#[async_trait]
impl Probes for SystemProbes {
    async fn signal(&self) -> Result<i32, ProbeError> {
        self.signal.query().await
    }

    async fn baseline_latency(&self, host: &str) -> Result<LatencyStats, ProbeError> {
        self.latency.baseline(host, self.baseline_deadline).await
    }

    async fn under_load(&self, host: &str, duration: Duration, direction: Direction) -> LoadedMeasurement {
        measure_under_load(&self.latency, &self.throughput, host, duration, direction, self.teardown).await
    }
}
