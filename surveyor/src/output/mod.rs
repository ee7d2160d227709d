//! Output and display management

use crate::config::{ExportConfig, OutputConfig};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat};
use crossterm::style::{Color, Stylize};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use survey_model::{IterationRecord, LocationSummary, RunPhase, RunState};
use tracing::{info, warn};

/// Column order of the CSV export; raw sample fields are left out
const CSV_HEADER: [&str; 12] = [
    "timestamp",
    "location",
    "iteration",
    "rssi",
    "latency_baseline",
    "jitter_baseline",
    "upload_bps",
    "latency_upload",
    "jitter_upload",
    "download_bps",
    "latency_download",
    "jitter_download",
];

/// Prints run progress to the console whenever something observable changes
pub struct OutputManager {
    use_colors: bool,
    last: Option<(RunPhase, String)>,
}

impl OutputManager {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            use_colors: config.use_colors,
            last: None,
        }
    }

    /// Print a progress line if the phase or message changed since the last call
    pub fn update(&mut self, state: &RunState) -> Result<()> {
        if let Some(line) = self.render(state) {
            let mut out = io::stdout().lock();
            writeln!(out, "{}", line)?;
            out.flush()?;
        }
        Ok(())
    }

    /// Progress line for `state`, `None` when nothing changed
    pub fn render(&mut self, state: &RunState) -> Option<String> {
        let key = (state.phase, state.message.clone());
        if self.last.as_ref() == Some(&key) {
            return None;
        }
        self.last = Some(key);

        let position = match &state.current_location {
            Some(location) => {
                let total = state.config.as_ref().map(|c| c.iterations()).unwrap_or_default();
                format!(" {} {}/{}", location, state.current_iteration, total)
            }
            None => String::new(),
        };
        let phase = format!("[{}]", state.phase);
        let phase = if self.use_colors {
            phase.with(phase_color(state.phase)).bold().to_string()
        } else {
            phase
        };

        Some(format!(
            "[{}] {}{} {}",
            Local::now().format("%H:%M:%S"),
            phase,
            position,
            state.message
        ))
    }

    /// Per-location table printed once the run is over
    pub fn print_summary(&self, state: &RunState) -> Result<()> {
        let mut out = io::stdout().lock();
        for line in summary_lines(&state.summaries) {
            writeln!(out, "{}", line)?;
        }
        if let Some(error) = &state.error {
            let line = format!("Run error: {}", error);
            if self.use_colors {
                writeln!(out, "{}", line.red())?;
            } else {
                writeln!(out, "{}", line)?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

fn phase_color(phase: RunPhase) -> Color {
    match phase {
        RunPhase::Idle => Color::Grey,
        RunPhase::Running => Color::Cyan,
        RunPhase::Paused => Color::Yellow,
        RunPhase::Complete => Color::Green,
        RunPhase::Stopped => Color::Magenta,
        RunPhase::Error => Color::Red,
    }
}

fn summary_lines(summaries: &BTreeMap<String, LocationSummary>) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<8} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "location", "rssi", "lat_base", "lat_ul", "lat_dl", "ul_mbps", "dl_mbps"
    )];
    for (location, s) in summaries {
        lines.push(format!(
            "{:<8} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10}",
            location,
            cell(s.rssi.mean),
            cell(s.latency_baseline.mean),
            cell(s.latency_upload.mean),
            cell(s.latency_download.mean),
            cell(s.upload_mbps.mean),
            cell(s.download_mbps.mean),
        ));
    }
    lines
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "N/A".to_string())
}

#[derive(Serialize)]
struct Report<'a> {
    summary: &'a BTreeMap<String, LocationSummary>,
    details: &'a [IterationRecord],
}

/// Export summaries and full records as pretty-printed JSON
pub fn export_json(state: &RunState, output_path: &Path) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {:?}", output_path))?;
    let mut writer = BufWriter::new(file);

    let report = Report {
        summary: &state.summaries,
        details: &state.records,
    };
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writer.flush()?;

    Ok(())
}

/// Export iteration records as CSV
pub fn export_csv(records: &[IterationRecord], output_path: &Path) -> Result<()> {
    if records.is_empty() {
        anyhow::bail!("No records to export");
    }
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {:?}", output_path))?;
    write_csv(records, file)
}

pub fn write_csv<W: Write>(records: &[IterationRecord], out: W) -> Result<()> {
    if records.is_empty() {
        anyhow::bail!("No records to export");
    }
    let mut writer = csv::Writer::from_writer(out);

    writer.write_record(CSV_HEADER)?;

    for r in records {
        writer.write_record(&[
            r.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            r.location.clone(),
            r.iteration.to_string(),
            r.rssi.map(|v| v.to_string()).unwrap_or_default(),
            num(r.latency_baseline),
            num(r.jitter_baseline),
            num(r.upload_bps),
            num(r.latency_upload),
            num(r.jitter_upload),
            num(r.download_bps),
            num(r.latency_download),
            num(r.jitter_download),
        ])?;
    }

    writer.flush()?;

    Ok(())
}

fn num(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// `network_test_results_<YYYYmmdd_HHMMSS>.<ext>`
pub fn default_file_name(now: DateTime<Local>, extension: &str) -> String {
    format!("network_test_results_{}.{}", now.format("%Y%m%d_%H%M%S"), extension)
}

/// Write every enabled export into the export directory; returns the files written
pub fn export_run(state: &RunState, config: &ExportConfig, now: DateTime<Local>) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    if config.enable_json {
        let path = config.directory.join(default_file_name(now, "json"));
        export_json(state, &path)?;
        info!("Exported JSON to {:?}", path);
        written.push(path);
    }

    if config.enable_csv {
        if state.records.is_empty() {
            warn!("No records collected; skipping CSV export");
        } else {
            let path = config.directory.join(default_file_name(now, "csv"));
            export_csv(&state.records, &path)?;
            info!("Exported CSV to {:?}", path);
            written.push(path);
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use survey_model::RunConfiguration;

    fn sample_state() -> RunState {
        let config = RunConfiguration::new("10.0.0.5", 2, 10).unwrap();
        let mut state = RunState::starting(config);

        let mut first = IterationRecord::new("p1", 1);
        first.rssi = Some(-55);
        first.latency_baseline = Some(11.5);
        first.ping_baseline_raw = vec![11.0, 12.0];
        first.upload_bps = Some(42_000_000.0);
        first.iperf_upload_raw = json!({ "end": { "sum_sent": { "bits_per_second": 42_000_000.0 } } });
        state.push_record(first).unwrap();

        let mut second = IterationRecord::new("p1", 2);
        second.iperf_download_raw = json!({ "error": "unable to connect to server" });
        state.push_record(second).unwrap();

        state.summarize("p1");
        state.phase = RunPhase::Complete;
        state
    }

    #[test]
    fn test_csv_skips_raw_fields_and_blanks_nulls() {
        let state = sample_state();
        let mut buf = Vec::new();
        write_csv(&state.records, &mut buf).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert!(!lines[0].contains("raw"));

        let first: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(first.len(), CSV_HEADER.len());
        assert_eq!(&first[1..7], &["p1", "1", "-55", "11.5", "", "42000000"]);
        assert!(DateTime::parse_from_rfc3339(first[0]).is_ok());

        let second: Vec<&str> = lines[2].split(',').collect();
        assert_eq!(&second[1..3], &["p1", "2"]);
        assert!(second[3..].iter().all(|cell| cell.is_empty()));
    }

    #[test]
    fn test_csv_rejects_empty_records() {
        let mut buf = Vec::new();
        assert!(write_csv(&[], &mut buf).is_err());

        let dir = tempfile::tempdir().unwrap();
        assert!(export_csv(&[], &dir.path().join("empty.csv")).is_err());
    }

    #[test]
    fn test_json_report_layout() {
        let state = sample_state();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        export_json(&state, &path).unwrap();

        let report: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let details = report["details"].as_array().unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0]["ping_baseline_raw"], json!([11.0, 12.0]));
        assert_eq!(details[1]["iperf_download_raw"]["error"], "unable to connect to server");
        assert_eq!(details[1]["rssi"], Value::Null);

        assert_eq!(report["summary"]["p1"]["rssi"]["mean"], json!(-55.0));
        assert_eq!(report["summary"]["p1"]["upload_mbps"]["samples"], json!(1));
    }

    #[test]
    fn test_default_file_name() {
        let now = Local.with_ymd_and_hms(2024, 5, 17, 9, 3, 7).unwrap();
        assert_eq!(default_file_name(now, "csv"), "network_test_results_20240517_090307.csv");
    }

    #[test]
    fn test_export_run_writes_enabled_formats() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig {
            directory: dir.path().to_path_buf(),
            enable_json: true,
            enable_csv: true,
        };
        let now = Local.with_ymd_and_hms(2024, 5, 17, 9, 3, 7).unwrap();

        let written = export_run(&sample_state(), &config, now).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|p| p.exists()));

        // Nothing recorded: JSON only
        let empty = RunState::default();
        let other = tempfile::tempdir().unwrap();
        let config = ExportConfig {
            directory: other.path().to_path_buf(),
            ..config
        };
        let written = export_run(&empty, &config, now).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].extension().and_then(|e| e.to_str()), Some("json"));
    }

    #[test]
    fn test_render_only_on_change() {
        let mut output = OutputManager::new(&OutputConfig {
            refresh_interval_ms: 500,
            use_colors: false,
        });
        let mut state = sample_state();
        state.phase = RunPhase::Running;
        state.current_location = Some("p2".to_string());
        state.current_iteration = 1;
        state.message = "(p2-1) Querying signal strength...".to_string();

        let line = output.render(&state).unwrap();
        assert!(line.ends_with("[running] p2 1/2 (p2-1) Querying signal strength..."), "{}", line);
        assert!(output.render(&state).is_none());

        state.phase = RunPhase::Paused;
        assert!(output.render(&state).is_some());
    }

    #[test]
    fn test_summary_lines() {
        let state = sample_state();
        let lines = summary_lines(&state.summaries);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("p1"));
        assert!(lines[1].contains("-55.00"));
        assert!(lines[1].contains("42.00"));
        assert!(lines[1].contains("N/A"));
    }
}
