//! ICMP reachability through the system `ping` utility.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use netmend_state::{ProbeDetail, ProbeError, ProbeResult};

fn ping_command(host: &str, timeout: Duration) -> Command {
    let mut cmd = Command::new("ping");
    if cfg!(windows) {
        let wait_ms = timeout.as_millis().max(1).to_string();
        cmd.args(["-n", "1", "-w", wait_ms.as_str(), host]);
    } else {
        let wait_secs = timeout.as_secs().max(1).to_string();
        cmd.args(["-c", "1", "-W", wait_secs.as_str(), host]);
    }
    cmd.kill_on_drop(true);
    cmd
}

static RTT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").ok());

/// Round-trip time from ping output (`time=12.3 ms`, `time<1ms`).
pub fn parse_rtt(output: &str) -> Option<f64> {
    let re = RTT.as_ref()?;
    re.captures(output)?.get(1)?.as_str().parse().ok()
}

/// Send one echo request and wait at most `timeout` for the reply.
pub async fn probe(host: &str, timeout: Duration) -> ProbeResult {
    let start = Instant::now();
    // ping's own deadline is rounded to whole seconds on most platforms.
    let deadline = timeout + Duration::from_secs(1);
    let output = match tokio::time::timeout(deadline, ping_command(host, timeout).output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return ProbeResult::failure(
                ProbeDetail::Reachability,
                ProbeError::Other(format!("cannot run ping: {e}")),
            );
        }
        Err(_) => return ProbeResult::failure(ProbeDetail::Reachability, ProbeError::Timeout),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let rtt = parse_rtt(&stdout);
    // Windows ping exits 0 on "Destination host unreachable" replies.
    let replied = output.status.success()
        && (rtt.is_some() || stdout.to_ascii_lowercase().contains("ttl="));

    if replied {
        let latency = rtt.unwrap_or_else(|| start.elapsed().as_secs_f64() * 1000.0);
        debug!(%host, latency_ms = latency, "ping ok");
        ProbeResult::success(ProbeDetail::Reachability, Some(latency))
    } else {
        debug!(%host, "no echo reply");
        ProbeResult::failure(ProbeDetail::Reachability, ProbeError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_pattern_compiles_once() {
        assert!(RTT.is_some());
        let first = RTT.as_ref().unwrap() as *const Regex;
        assert_eq!(parse_rtt("time=5 ms"), Some(5.0));
        assert_eq!(parse_rtt("time=7 ms"), Some(7.0));
        assert_eq!(RTT.as_ref().unwrap() as *const Regex, first);
    }

    #[test]
    fn parses_linux_output() {
        let out = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=0.412 ms";
        assert_eq!(parse_rtt(out), Some(0.412));
    }

    #[test]
    fn parses_windows_output() {
        assert_eq!(
            parse_rtt("Reply from 10.0.0.1: bytes=32 time=3ms TTL=128"),
            Some(3.0)
        );
        assert_eq!(
            parse_rtt("Reply from 10.0.0.1: bytes=32 time<1ms TTL=128"),
            Some(1.0)
        );
    }

    #[test]
    fn no_rtt_in_failure_output() {
        assert_eq!(parse_rtt("Request timed out."), None);
        assert_eq!(parse_rtt("1 packets transmitted, 0 received, 100% packet loss"), None);
    }
}
