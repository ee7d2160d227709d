//! Location × iteration survey sequence

use super::shared::SharedState;
use super::signals::RunSignals;
use crate::probe::{Direction, LatencyStats, LoadedMeasurement, ProbeError, Probes};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use survey_model::{IterationRecord, RunConfiguration, RunPhase};
use tracing::{info, warn};

/// Drives one run; owned by the worker task
pub(crate) struct Runner<P: Probes> {
    pub(crate) probes: Arc<P>,
    pub(crate) state: SharedState,
    pub(crate) signals: Arc<RunSignals>,
    pub(crate) config: RunConfiguration,
    pub(crate) locations: Vec<String>,
}

impl<P: Probes> Runner<P> {
    /// Survey every location in order, pausing in between.
    ///
    /// Returns the terminal phase (`Complete` or `Stopped`); any `Err` is a fatal fault.
    pub(crate) async fn run(self) -> Result<RunPhase> {
        let total = self.locations.len();

        for (idx, location) in self.locations.iter().enumerate() {
            if self.stopped() {
                self.progress(format!("Survey stopped before {}.", location)).await;
                break;
            }

            self.state
                .update(|s| {
                    s.current_location = Some(location.clone());
                    s.current_iteration = 0;
                })
                .await;

            self.run_location(location).await?;

            if self.state.update(|s| s.summarize(location)).await {
                info!("Summary updated for {}", location);
            }

            if idx + 1 == total || self.stopped() {
                continue;
            }

            self.state.update(|s| s.phase = RunPhase::Paused).await;
            self.progress(format!(
                "Location {} complete. Paused: move to the next location and resume.",
                location
            ))
            .await;

            if !self.signals.wait_for_resume().await {
                self.progress(format!("Survey stopped while paused after {}.", location)).await;
                break;
            }

            self.state.update(|s| s.phase = RunPhase::Running).await;
        }

        if self.stopped() {
            Ok(RunPhase::Stopped)
        } else {
            Ok(RunPhase::Complete)
        }
    }

    async fn run_location(&self, location: &str) -> Result<()> {
        let iterations = self.config.iterations();

        for iteration in 1..=iterations {
            if self.stopped() {
                self.progress(format!("Survey stopped at {}, iteration {}.", location, iteration))
                    .await;
                return Ok(());
            }

            self.state.update(|s| s.current_iteration = iteration).await;
            self.progress(format!(
                "Location {}, iteration {}/{}: starting...",
                location, iteration, iterations
            ))
            .await;

            let Some(record) = self.run_iteration(location, iteration).await else {
                self.progress(format!(
                    "Survey stopped during {}, iteration {}; partial iteration discarded.",
                    location, iteration
                ))
                .await;
                return Ok(());
            };

            let line = completion_line(&record);
            self.state
                .update(|s| s.push_record(record))
                .await
                .with_context(|| format!("Failed to record {} iteration {}", location, iteration))?;
            self.progress(line).await;
        }

        Ok(())
    }

    /// The four measurement phases; `None` when a stop interrupts the iteration
    async fn run_iteration(&self, location: &str, iteration: u32) -> Option<IterationRecord> {
        let tag = format!("({}-{})", location, iteration);
        let host = self.config.host();
        let duration = Duration::from_secs(self.config.duration_secs());
        let mut record = IterationRecord::new(location, iteration);

        self.progress(format!("{} Querying signal strength...", tag)).await;
        let signal = self.probes.signal().await;
        record.rssi = self.absorb(&tag, signal, false).await;
        if self.stopped() {
            return None;
        }

        self.progress(format!("{} Baseline ping to {}...", tag, host)).await;
        let baseline = self.probes.baseline_latency(host).await;
        let baseline = self.absorb(&tag, baseline, true).await.unwrap_or_default();
        record.latency_baseline = baseline.latency_ms;
        record.jitter_baseline = baseline.jitter_ms;
        record.ping_baseline_raw = baseline.samples;
        if self.stopped() {
            return None;
        }

        for direction in [Direction::Upload, Direction::Download] {
            self.progress(format!(
                "{} {} throughput + ping ({}s) to {}...",
                tag,
                direction,
                duration.as_secs(),
                host
            ))
            .await;
            let measured = self.probes.under_load(host, duration, direction).await;
            self.apply_loaded(&tag, &mut record, direction, measured).await;

            if direction == Direction::Upload && self.stopped() {
                return None;
            }
        }

        Some(record)
    }

    async fn apply_loaded(&self, tag: &str, record: &mut IterationRecord, direction: Direction, measured: LoadedMeasurement) {
        let LoadedMeasurement { throughput, latency } = measured;
        let rate = self.absorb(tag, throughput.bits_per_second, true).await;
        let LatencyStats {
            latency_ms,
            jitter_ms,
            samples,
        } = self.absorb(tag, latency, true).await.unwrap_or_default();

        match direction {
            Direction::Upload => {
                record.upload_bps = rate;
                record.iperf_upload_raw = throughput.raw;
                record.latency_upload = latency_ms;
                record.jitter_upload = jitter_ms;
                record.ping_upload_raw = samples;
            }
            Direction::Download => {
                record.download_bps = rate;
                record.iperf_download_raw = throughput.raw;
                record.latency_download = latency_ms;
                record.jitter_download = jitter_ms;
                record.ping_download_raw = samples;
            }
        }
    }

    /// Turn a probe failure into a null metric.
    ///
    /// A missing core tool also raises the sticky run error.
    async fn absorb<T>(&self, tag: &str, outcome: Result<T, ProbeError>, core_tool: bool) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                let message = format!("{} Error: {}", tag, e);
                warn!("{}", message);
                let sticky = (core_tool && e.is_missing_binary()).then(|| e.to_string());
                self.state
                    .update(|s| {
                        s.message = message;
                        if sticky.is_some() {
                            s.error = sticky;
                        }
                    })
                    .await;
                None
            }
        }
    }

    async fn progress(&self, message: String) {
        info!("{}", message);
        self.state.update(|s| s.message = message).await;
    }

    fn stopped(&self) -> bool {
        self.signals.stop_requested()
    }
}

fn completion_line(record: &IterationRecord) -> String {
    format!(
        "({}-{}) Complete. (DL: {} Mbps, UL: {} Mbps) (Lat-Base: {} ms, Lat-UL: {} ms, Lat-DL: {} ms)",
        record.location,
        record.iteration,
        fmt_opt(record.download_mbps()),
        fmt_opt(record.upload_mbps()),
        fmt_opt(record.latency_baseline),
        fmt_opt(record.latency_upload),
        fmt_opt(record.latency_download),
    )
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "N/A".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_line_handles_nulls() {
        let mut record = IterationRecord::new("p2", 3);
        record.download_bps = Some(48_250_000.0);
        record.latency_baseline = Some(11.456);

        let line = completion_line(&record);
        assert_eq!(
            line,
            "(p2-3) Complete. (DL: 48.25 Mbps, UL: N/A Mbps) (Lat-Base: 11.46 ms, Lat-UL: N/A ms, Lat-DL: N/A ms)"
        );
    }
}
