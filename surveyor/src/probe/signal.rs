//! Wi-Fi signal strength query

use super::{excerpt, run_captured, ProbeError, ToolCommand};
use serde::Deserialize;
use std::time::Duration;

/// The part of `termux-wifi-connectioninfo` output we care about
#[derive(Debug, Deserialize)]
struct ConnectionInfo {
    rssi: Option<i64>,
}

pub fn parse_signal_output(tool: &str, stdout: &str) -> Result<i32, ProbeError> {
    let info: ConnectionInfo = serde_json::from_str(stdout).map_err(|e| ProbeError::Malformed {
        tool: tool.to_string(),
        detail: format!("invalid JSON: {}", e),
    })?;

    let rssi = info.rssi.ok_or_else(|| ProbeError::Malformed {
        tool: tool.to_string(),
        detail: "no rssi field".to_string(),
    })?;

    i32::try_from(rssi).map_err(|_| ProbeError::Malformed {
        tool: tool.to_string(),
        detail: format!("rssi {} out of range", rssi),
    })
}

pub struct SignalProbe {
    tool: ToolCommand,
    timeout: Duration,
}

impl SignalProbe {
    pub fn new(tool: ToolCommand, timeout: Duration) -> Self {
        Self { tool, timeout }
    }

    pub async fn query(&self) -> Result<i32, ProbeError> {
        let output = run_captured(&self.tool, &[], self.timeout).await?;
        if !output.status.success() {
            return Err(ProbeError::NonZeroExit {
                tool: self.tool.name().to_string(),
                status: output.status,
                stderr: excerpt(&output.stderr),
            });
        }

        parse_signal_output(self.tool.name(), &String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection_info() {
        let json = r#"{
            "bssid": "aa:bb:cc:dd:ee:ff",
            "frequency_mhz": 5180,
            "ip": "192.168.1.23",
            "link_speed_mbps": 433,
            "rssi": -61,
            "ssid": "field-lab",
            "supplicant_state": "COMPLETED"
        }"#;
        assert_eq!(parse_signal_output("termux-wifi-connectioninfo", json).unwrap(), -61);
    }

    #[test]
    fn test_missing_rssi() {
        let err = parse_signal_output("termux-wifi-connectioninfo", r#"{"ssid": "x"}"#).unwrap_err();
        assert!(matches!(err, ProbeError::Malformed { ref detail, .. } if detail.contains("rssi")));
    }

    #[test]
    fn test_invalid_json() {
        let err = parse_signal_output("termux-wifi-connectioninfo", "permission denied").unwrap_err();
        assert!(matches!(err, ProbeError::Malformed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit() {
        let probe = SignalProbe::new(ToolCommand::parse("false"), Duration::from_secs(5));
        let err = probe.query().await.unwrap_err();
        assert!(matches!(err, ProbeError::NonZeroExit { .. }), "unexpected error: {}", err);
    }
}
