//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use survey_model::{DEFAULT_LOCATION_COUNT, DEFAULT_LOCATION_PREFIX};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub tools: ToolsConfig,
    pub timing: TimingConfig,
    pub output: OutputConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub location_count: usize,
    pub location_prefix: String,
}

/// Command lines for the external measurement tools.
///
/// The first word is the program, any further words are passed before the probe's own arguments.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub signal: String,
    pub ping: String,
    pub iperf3: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    pub signal_timeout_s: u64,
    /// Deadline of the baseline ping burst
    pub baseline_deadline_s: u64,
    pub ping_interval_s: f64,
    /// Extra time granted to the throughput tool beyond the test duration
    pub throughput_grace_s: u64,
    /// Time the concurrent ping gets to exit after SIGTERM before it is killed
    pub probe_teardown_ms: u64,
    /// Time `stop` waits for the worker before force-marking the run stopped
    pub stop_ack_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub refresh_interval_ms: u64,
    pub use_colors: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    pub directory: PathBuf,
    pub enable_json: bool,
    pub enable_csv: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            location_count: DEFAULT_LOCATION_COUNT,
            location_prefix: DEFAULT_LOCATION_PREFIX.to_string(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            signal: "termux-wifi-connectioninfo".to_string(),
            ping: "ping".to_string(),
            iperf3: "iperf3".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            signal_timeout_s: 5,
            baseline_deadline_s: 8,
            ping_interval_s: 0.2,
            throughput_grace_s: 10,
            probe_teardown_ms: 2000,
            stop_ack_ms: 2000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 500,
            use_colors: true,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            enable_json: true,
            enable_csv: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TimingConfig {
    pub fn signal_timeout(&self) -> Duration {
        Duration::from_secs(self.signal_timeout_s)
    }

    pub fn probe_teardown(&self) -> Duration {
        Duration::from_millis(self.probe_teardown_ms)
    }

    pub fn stop_ack(&self) -> Duration {
        Duration::from_millis(self.stop_ack_ms)
    }

    /// Ping interval as passed to `ping -i`
    pub fn ping_interval_arg(&self) -> String {
        format!("{}", self.ping_interval_s)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config = Self::parse(&contents)?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.general.location_count == 0 {
            anyhow::bail!("general.location_count must be at least 1");
        }
        if !(self.timing.ping_interval_s > 0.0) {
            anyhow::bail!("timing.ping_interval_s must be positive");
        }
        for (name, command) in [
            ("signal", &self.tools.signal),
            ("ping", &self.tools.ping),
            ("iperf3", &self.tools.iperf3),
        ] {
            if command.trim().is_empty() {
                anyhow::bail!("tools.{} must not be empty", name);
            }
        }
        Ok(())
    }
}
