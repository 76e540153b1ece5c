//! CPU, memory, and disk sampling.
//!
//! Remote devices are sampled over a management session by running a small
//! set of shell one-liners; the first command of each metric that prints a
//! usable percentage wins. The monitor host itself is sampled in-process.

use std::time::Duration;

use sysinfo::{Disks, Networks, System};
use tracing::{debug, warn};

use netmend_remote::{SessionConnector, SessionTarget};
use netmend_state::{PerformanceSample, ProbeDetail, ProbeError, ProbeResult};

const CPU_COMMANDS: &[&str] = &[
    r#"powershell "Get-Counter '\Processor(_Total)\% Processor Time' | Select-Object -ExpandProperty CounterSamples | Select-Object -ExpandProperty CookedValue""#,
    r#"top -bn1 | grep 'Cpu(s)' | sed 's/.*, *\([0-9.]*\)%* id.*/\1/' | awk '{print 100 - $1}'"#,
];

const MEMORY_COMMANDS: &[&str] = &[
    r#"powershell "Get-CimInstance Win32_OperatingSystem | ForEach-Object { [math]::Round((($_.TotalVisibleMemorySize - $_.FreePhysicalMemory) / $_.TotalVisibleMemorySize) * 100, 2) }""#,
    r#"free | grep Mem | awk '{print ($3/$2) * 100.0}'"#,
];

const DISK_COMMANDS: &[&str] = &[
    r#"powershell "Get-PSDrive C | ForEach-Object { [math]::Round($_.Used / ($_.Used + $_.Free) * 100, 2) }""#,
    r#"df -h / | awk 'NR==2 {print $5}' | sed 's/%//'"#,
];

/// A percentage printed by one of the sampling commands.
pub fn parse_percent(output: &str) -> Option<f64> {
    let value: f64 = output.trim().trim_end_matches('%').trim().parse().ok()?;
    (value.is_finite() && (0.0..=100.0).contains(&value)).then_some(value)
}

fn result_for(sample: PerformanceSample) -> ProbeResult {
    if sample.is_empty() {
        ProbeResult::failure(
            ProbeDetail::Performance { sample: None },
            ProbeError::Other("no performance counters could be read".to_string()),
        )
    } else {
        ProbeResult::success(ProbeDetail::Performance { sample: Some(sample) }, None)
    }
}

/// Sample a remote device over a management session.
pub async fn sample_remote(
    connector: &dyn SessionConnector,
    target: &SessionTarget,
    connect_timeout: Duration,
    command_timeout: Duration,
) -> ProbeResult {
    let mut session = match connector.connect(target, connect_timeout).await {
        Ok(session) => session,
        Err(e) => {
            debug!(target = ?target, error = %e, "performance session failed");
            return ProbeResult::failure(
                ProbeDetail::Performance { sample: None },
                ProbeError::Session(e.to_string()),
            );
        }
    };

    let mut values = [None; 3];
    for (slot, commands) in values
        .iter_mut()
        .zip([CPU_COMMANDS, MEMORY_COMMANDS, DISK_COMMANDS])
    {
        for command in commands {
            match session.exec(command, command_timeout).await {
                Ok(out) => {
                    if let Some(v) = parse_percent(&out.stdout) {
                        *slot = Some(v);
                        break;
                    }
                }
                Err(e) => debug!(target = ?target, error = %e, "sampling command failed"),
            }
        }
    }
    session.close().await;

    let [cpu_percent, memory_percent, disk_percent] = values;
    result_for(PerformanceSample {
        cpu_percent,
        memory_percent,
        disk_percent,
        net_rx_bytes: None,
        net_tx_bytes: None,
    })
}

/// Sample the host running the monitor.
pub async fn sample_local() -> ProbeResult {
    let mut sys = System::new_all();
    sys.refresh_all();
    // CPU usage is a delta between two refreshes.
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();

    let cpu = sys.global_cpu_info().cpu_usage() as f64;
    let total = sys.total_memory();
    let memory = (total > 0)
        .then(|| (total - sys.available_memory().min(total)) as f64 * 100.0 / total as f64);

    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.list().first());
    let disk = root.and_then(|d| {
        let total = d.total_space();
        (total > 0).then(|| (total - d.available_space().min(total)) as f64 * 100.0 / total as f64)
    });

    let networks = Networks::new_with_refreshed_list();
    let (rx, tx) = networks.iter().fold((0u64, 0u64), |(rx, tx), (_, data)| {
        (rx + data.total_received(), tx + data.total_transmitted())
    });

    if disk.is_none() {
        warn!("no disk found for local performance sample");
    }
    result_for(PerformanceSample {
        cpu_percent: Some(cpu),
        memory_percent: memory,
        disk_percent: disk,
        net_rx_bytes: Some(rx),
        net_tx_bytes: Some(tx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmend_remote::{MockConnector, SessionError};
    use netmend_state::ProbeStatus;

    fn target() -> SessionTarget {
        SessionTarget {
            host: "10.0.0.7".to_string(),
            port: 22,
            username: "admin".to_string(),
            password: "pw".to_string(),
        }
    }

    #[test]
    fn percent_parsing() {
        assert_eq!(parse_percent("12.5\n"), Some(12.5));
        assert_eq!(parse_percent(" 73% "), Some(73.0));
        assert_eq!(parse_percent(""), None);
        assert_eq!(parse_percent("'powershell' is not recognized"), None);
        assert_eq!(parse_percent("250"), None);
    }

    #[tokio::test]
    async fn linux_fallbacks_fill_sample() {
        let mock = MockConnector::new();
        mock.respond("top -bn1", "12.5\n")
            .respond("free |", "40.25\n")
            .respond("df -h", "73\n");

        let result = sample_remote(&mock, &target(), Duration::from_secs(1), Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Success);
        let ProbeDetail::Performance { sample: Some(sample) } = result.detail else {
            panic!("expected a performance sample");
        };
        assert_eq!(sample.cpu_percent, Some(12.5));
        assert_eq!(sample.memory_percent, Some(40.25));
        assert_eq!(sample.disk_percent, Some(73.0));
        // windows counter tried first for each metric
        assert_eq!(mock.commands().len(), 6);
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test]
    async fn windows_counter_short_circuits() {
        let mock = MockConnector::new();
        mock.respond("Get-Counter", "5.5");
        let result = sample_remote(&mock, &target(), Duration::from_secs(1), Duration::from_secs(1)).await;
        let ProbeDetail::Performance { sample: Some(sample) } = result.detail else {
            panic!("expected a performance sample");
        };
        assert_eq!(sample.cpu_percent, Some(5.5));
        assert!(!mock.commands().iter().any(|c| c.contains("top -bn1")));
    }

    #[tokio::test]
    async fn nothing_readable_is_failure() {
        let mock = MockConnector::new();
        let result = sample_remote(&mock, &target(), Duration::from_secs(1), Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Failure);
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test]
    async fn session_failure_is_reported() {
        let mock = MockConnector::new();
        mock.fail_connect(SessionError::Auth {
            user: "admin".to_string(),
            target: "10.0.0.7:22".to_string(),
        });
        let result = sample_remote(&mock, &target(), Duration::from_secs(1), Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Failure);
        assert!(matches!(result.error, Some(ProbeError::Session(_))));
    }
}
