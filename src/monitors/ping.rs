//! Round-trip latency via the system `ping` binary

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use super::CollectionError;

fn latency_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("latency regex is valid")
    })
}

/// Extract the round-trip time in milliseconds from `ping` output
pub fn parse_ping_latency(output: &str) -> Option<f64> {
    latency_regex()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn ping_command(host: &str, timeout: Duration) -> Command {
    let secs = timeout.as_secs().max(1);
    let mut cmd = Command::new("ping");

    if cfg!(target_os = "windows") {
        cmd.args(["-n", "1", "-w", &(secs * 1000).to_string(), host]);
    } else if cfg!(target_os = "macos") {
        cmd.args(["-c", "1", "-t", &secs.to_string(), host]);
    } else {
        cmd.args(["-c", "1", "-W", &secs.to_string(), host]);
    }

    cmd.kill_on_drop(true);
    cmd
}

/// Ping `host` once and return the latency in milliseconds
pub async fn ping(host: &str, timeout: Duration) -> Result<f64, CollectionError> {
    // The binary enforces `timeout` itself; the outer bound covers DNS stalls.
    let output = tokio::time::timeout(timeout + Duration::from_secs(2), ping_command(host, timeout).output())
        .await
        .map_err(|_| CollectionError::Timeout(timeout))?
        .map_err(|e| CollectionError::Ping {
            host: host.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(CollectionError::Ping {
            host: host.to_string(),
            message: format!("exit status {}", output.status),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ping_latency(&stdout).ok_or_else(|| CollectionError::Ping {
        host: host.to_string(),
        message: "no latency in ping output".to_string(),
    })
}
