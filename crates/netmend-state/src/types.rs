//! Domain types for device status, probe results, and healing history.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use netmend_core::{DeviceId, ProbeKind};

// ── Probe results ──────────────────────────────────────────────────

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Success,
    Failure,
    /// The probe could not run for this device (e.g. performance sampling
    /// without a management session). Not a failure.
    Unavailable,
}

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeError {
    #[error("timed out")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection reset")]
    ConnectionReset,

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("expected status {expected}, got {actual}")]
    StatusMismatch { expected: u16, actual: u16 },

    #[error("resolution failed: {0}")]
    Resolution(String),

    #[error("management session failed: {0}")]
    Session(String),

    #[error("{0}")]
    Other(String),
}

/// Resource utilisation sampled from a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub net_rx_bytes: Option<u64>,
    pub net_tx_bytes: Option<u64>,
}

impl PerformanceSample {
    pub fn is_empty(&self) -> bool {
        self.cpu_percent.is_none() && self.memory_percent.is_none() && self.disk_percent.is_none()
    }
}

/// Probe-specific measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeDetail {
    Reachability,
    Http {
        url: String,
        expected_status: u16,
        status_code: Option<u16>,
    },
    Port {
        port: u16,
    },
    Dns {
        domain: String,
        server: String,
        resolved: Vec<String>,
    },
    Performance {
        sample: Option<PerformanceSample>,
    },
}

impl ProbeDetail {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeDetail::Reachability => ProbeKind::Reachability,
            ProbeDetail::Http { .. } => ProbeKind::Http,
            ProbeDetail::Port { .. } => ProbeKind::Port,
            ProbeDetail::Dns { .. } => ProbeKind::Dns,
            ProbeDetail::Performance { .. } => ProbeKind::Performance,
        }
    }
}

/// Result of one probe against one device in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub status: ProbeStatus,
    /// Round-trip or request latency in milliseconds.
    pub latency_ms: Option<f64>,
    pub error: Option<ProbeError>,
    pub detail: ProbeDetail,
}

impl ProbeResult {
    pub fn success(detail: ProbeDetail, latency_ms: Option<f64>) -> Self {
        Self {
            status: ProbeStatus::Success,
            latency_ms,
            error: None,
            detail,
        }
    }

    pub fn failure(detail: ProbeDetail, error: ProbeError) -> Self {
        Self {
            status: ProbeStatus::Failure,
            latency_ms: None,
            error: Some(error),
            detail,
        }
    }

    pub fn unavailable(detail: ProbeDetail) -> Self {
        Self {
            status: ProbeStatus::Unavailable,
            latency_ms: None,
            error: None,
            detail,
        }
    }

    pub fn kind(&self) -> ProbeKind {
        self.detail.kind()
    }

    pub fn is_success(&self) -> bool {
        self.status == ProbeStatus::Success
    }
}

// ── Device status ──────────────────────────────────────────────────

/// Current health of a device, owned by the [`DeviceStateStore`](crate::DeviceStateStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub ip: DeviceId,
    pub label: String,
    pub lab_id: String,
    pub online: bool,
    /// Epoch seconds of the last successful primary probe.
    pub last_seen: Option<u64>,
    /// Epoch seconds of the last completed probe round. `None` until the
    /// device has been probed once.
    pub last_checked: Option<u64>,
    pub consecutive_failures: u32,
    /// One result per enabled probe, in execution order.
    pub results: Vec<ProbeResult>,
}

impl DeviceStatus {
    pub fn new(ip: &str, label: &str, lab_id: &str) -> Self {
        Self {
            ip: ip.to_string(),
            label: label.to_string(),
            lab_id: lab_id.to_string(),
            online: false,
            last_seen: None,
            last_checked: None,
            consecutive_failures: 0,
            results: Vec::new(),
        }
    }

    /// Latency reported by the first successful result that carries one.
    pub fn primary_latency_ms(&self) -> Option<f64> {
        self.results
            .iter()
            .find(|r| r.is_success() && r.latency_ms.is_some())
            .and_then(|r| r.latency_ms)
    }
}

/// Result of a remediation attempt, as recorded on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingOutcome {
    Success,
    Failure,
    Exhausted,
}

/// Per-device remediation bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealingRecord {
    /// Attempts since the last recovery.
    pub attempts: u32,
    pub last_outcome: Option<HealingOutcome>,
    pub last_attempt_at: Option<u64>,
    pub in_progress: bool,
    /// Set by an attempt, cleared by the next failed probe. Eligibility is
    /// re-armed only once the device has been seen failing again.
    pub awaiting_probe: bool,
}

/// A device's status together with its healing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub status: DeviceStatus,
    pub healing: HealingRecord,
}

/// What changed in one [`DeviceStateStore::update`](crate::DeviceStateStore::update).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub ip: DeviceId,
    /// `None` on the first observation of the device.
    pub previous_online: Option<bool>,
    pub online: bool,
    pub consecutive_failures: u32,
    /// Set on an offline→online transition; holds the attempt counter that
    /// was cleared.
    pub recovered: Option<u32>,
}

impl StatusUpdate {
    /// First observation or an online/offline flip.
    pub fn is_transition(&self) -> bool {
        self.previous_online != Some(self.online)
    }
}

/// Result of asking the store to start a healing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptGate {
    /// The attempt counter was incremented; this is attempt number `attempt`.
    Granted { attempt: u32 },
    /// The counter is at the cap; nothing was incremented.
    Exhausted { attempts: u32 },
    /// Another attempt for this device has not finished yet.
    InProgress,
}

// ── Healing log ────────────────────────────────────────────────────

/// Outcome column of a healing log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Success,
    Failed,
    Exhausted,
    Recovered,
}

impl LogOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogOutcome::Success => "success",
            LogOutcome::Failed => "failed",
            LogOutcome::Exhausted => "exhausted",
            LogOutcome::Recovered => "recovered",
        }
    }
}

impl fmt::Display for LogOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only healing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingLogEntry {
    pub timestamp: u64,
    pub ip: DeviceId,
    pub label: String,
    pub lab_id: String,
    pub attempt: u32,
    pub method: String,
    pub outcome: LogOutcome,
    pub detail: String,
}

// ── History samples ────────────────────────────────────────────────

/// Primary-probe outcome of one device in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSample {
    pub timestamp: u64,
    pub ip: DeviceId,
    pub label: String,
    pub lab_id: String,
    pub online: bool,
    pub latency_ms: Option<f64>,
    /// Failing probe kinds in this cycle, primary or not.
    #[serde(default)]
    pub failed_probes: Vec<ProbeKind>,
}

impl ProbeSample {
    pub fn from_status(status: &DeviceStatus, timestamp: u64) -> Self {
        Self {
            timestamp,
            ip: status.ip.clone(),
            label: status.label.clone(),
            lab_id: status.lab_id.clone(),
            online: status.online,
            latency_ms: status.primary_latency_ms(),
            failed_probes: status
                .results
                .iter()
                .filter(|r| r.status == ProbeStatus::Failure)
                .map(ProbeResult::kind)
                .collect(),
        }
    }
}

/// A stored performance sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub timestamp: u64,
    pub ip: DeviceId,
    pub sample: PerformanceSample,
}

/// Latency aggregate over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: u64,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub avg_ms: Option<f64>,
}

/// Uptime of one device within a lab summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceUptime {
    pub ip: DeviceId,
    pub label: String,
    pub samples: u64,
    pub online_samples: u64,
    pub uptime_percent: f64,
    pub avg_latency_ms: Option<f64>,
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_error_serializes_with_kind_tag() {
        let err = ProbeError::StatusMismatch {
            expected: 200,
            actual: 503,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "status_mismatch");
        assert_eq!(json["detail"]["actual"], 503);
        assert_eq!(err.to_string(), "expected status 200, got 503");
    }

    #[test]
    fn probe_result_kind_follows_detail() {
        let result = ProbeResult::failure(ProbeDetail::Port { port: 22 }, ProbeError::ConnectionRefused);
        assert_eq!(result.kind(), ProbeKind::Port);
        assert!(!result.is_success());
        assert_eq!(result.error, Some(ProbeError::ConnectionRefused));
    }

    #[test]
    fn sample_from_status_collects_failed_probes() {
        let mut status = DeviceStatus::new("10.0.0.1", "sw", "lab");
        status.online = true;
        status.results = vec![
            ProbeResult::success(ProbeDetail::Reachability, Some(1.5)),
            ProbeResult::failure(ProbeDetail::Port { port: 443 }, ProbeError::Timeout),
            ProbeResult::unavailable(ProbeDetail::Performance { sample: None }),
        ];
        let sample = ProbeSample::from_status(&status, 42);
        assert!(sample.online);
        assert_eq!(sample.latency_ms, Some(1.5));
        assert_eq!(sample.failed_probes, vec![ProbeKind::Port]);
    }

    #[test]
    fn update_transition_detection() {
        let first = StatusUpdate {
            ip: "a".into(),
            previous_online: None,
            online: false,
            consecutive_failures: 1,
            recovered: None,
        };
        assert!(first.is_transition());

        let steady = StatusUpdate {
            previous_online: Some(false),
            ..first.clone()
        };
        assert!(!steady.is_transition());
    }
}
