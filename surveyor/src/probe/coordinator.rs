//! Throughput testing with a concurrent ping (latency under load)

use super::latency::{parse_ping_output, LatencyProbe, LatencyStats};
use super::process::ScopedProcess;
use super::throughput::{Direction, ThroughputProbe, ThroughputRun};
use super::ProbeError;
use std::time::Duration;
use tracing::debug;

/// Result of one loaded phase: the throughput test and the ping that ran alongside it
#[derive(Debug)]
pub struct LoadedMeasurement {
    pub throughput: ThroughputRun,
    pub latency: Result<LatencyStats, ProbeError>,
}

/// Run a throughput test in `direction` while pinging `host`.
///
/// The ping starts first and is torn down once the throughput test has finished, whatever its
/// outcome, so the samples always cover the load window. If the ping cannot be started the
/// throughput test is skipped.
pub async fn measure_under_load(
    latency: &LatencyProbe,
    throughput: &ThroughputProbe,
    host: &str,
    duration: Duration,
    direction: Direction,
    teardown: Duration,
) -> LoadedMeasurement {
    let ping = match ScopedProcess::spawn(latency.tool(), &latency.continuous_args(host)) {
        Ok(ping) => ping,
        Err(e) => {
            let skipped = ProbeError::Skipped {
                tool: throughput.tool().name().to_string(),
                reason: format!("concurrent {} could not start", latency.tool().name()),
            };
            return LoadedMeasurement {
                throughput: ThroughputRun::failed(skipped),
                latency: Err(e),
            };
        }
    };

    let run = throughput.run(host, duration, direction).await;

    let output = ping.terminate(teardown).await;
    debug!("{} ping under load: {} bytes", direction, output.len());

    LoadedMeasurement {
        throughput: run,
        latency: parse_ping_output(latency.tool().name(), &output, None),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::probe::ToolCommand;
    use std::io::Write;
    use std::path::Path;

    const FAKE_PING: &str = "\
i=0
while true; do
  i=$((i+1))
  echo \"64 bytes from 10.0.0.5: icmp_seq=$i ttl=64 time=2$i.5 ms\"
  sleep 0.05
done
";

    fn script(dir: &Path, name: &str, body: &str) -> ToolCommand {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        ToolCommand::parse(&format!("sh {}", path.display()))
    }

    fn probes(dir: &Path, iperf_body: &str) -> (LatencyProbe, ThroughputProbe) {
        let ping = script(dir, "ping.sh", FAKE_PING);
        let iperf = script(dir, "iperf3.sh", iperf_body);
        (
            LatencyProbe::new(ping, "0.2".to_string()),
            ThroughputProbe::new(iperf, Duration::from_secs(10)),
        )
    }

    #[tokio::test]
    async fn test_tool_error_keeps_latency_under_load() {
        let dir = tempfile::tempdir().unwrap();
        let (latency, throughput) = probes(
            dir.path(),
            "sleep 0.4\necho '{\"error\": \"unable to connect to server: Connection refused\"}'\nexit 1\n",
        );

        let measured = measure_under_load(
            &latency,
            &throughput,
            "10.0.0.5",
            Duration::from_secs(5),
            Direction::Upload,
            Duration::from_secs(2),
        )
        .await;

        assert!(matches!(
            measured.throughput.bits_per_second,
            Err(ProbeError::Reported { .. })
        ));
        assert!(measured.throughput.raw.get("error").is_some());

        let stats = measured.latency.unwrap();
        assert!(!stats.samples.is_empty());
        assert!(stats.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_download_rate_and_latency() {
        let dir = tempfile::tempdir().unwrap();
        let (latency, throughput) = probes(
            dir.path(),
            "sleep 0.3\necho '{\"end\": {\"sum_sent\": {\"bits_per_second\": 1.0}, \"sum_received\": {\"bits_per_second\": 48000000.0}}}'\n",
        );

        let measured = measure_under_load(
            &latency,
            &throughput,
            "10.0.0.5",
            Duration::from_secs(5),
            Direction::Download,
            Duration::from_secs(2),
        )
        .await;

        assert_eq!(measured.throughput.bits_per_second.unwrap(), 48_000_000.0);
        assert!(measured.latency.unwrap().samples.len() >= 2);
    }

    #[tokio::test]
    async fn test_missing_ping_skips_throughput() {
        let dir = tempfile::tempdir().unwrap();
        let iperf = script(dir.path(), "iperf3.sh", "echo should-not-run > ran\n");
        let latency = LatencyProbe::new(ToolCommand::parse("fieldsurvey-no-such-ping-4711"), "0.2".to_string());
        let throughput = ThroughputProbe::new(iperf, Duration::from_secs(10));

        let measured = measure_under_load(
            &latency,
            &throughput,
            "10.0.0.5",
            Duration::from_secs(5),
            Direction::Upload,
            Duration::from_secs(2),
        )
        .await;

        assert!(measured.latency.unwrap_err().is_missing_binary());
        assert!(matches!(
            measured.throughput.bits_per_second,
            Err(ProbeError::Skipped { .. })
        ));
    }

    #[tokio::test]
    async fn test_longest_duration_does_not_overflow_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (latency, throughput) = probes(
            dir.path(),
            "sleep 0.2\necho '{\"end\": {\"sum_sent\": {\"bits_per_second\": 12000000.0}}}'\n",
        );

        let measured = measure_under_load(
            &latency,
            &throughput,
            "10.0.0.5",
            Duration::from_secs(u64::MAX),
            Direction::Upload,
            Duration::from_secs(2),
        )
        .await;

        assert_eq!(measured.throughput.bits_per_second.unwrap(), 12_000_000.0);
        assert!(measured.latency.is_ok());
    }
}
