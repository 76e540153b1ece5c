//! Device model shared across netmend crates.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Identity of a monitored device: its IP address (or `localhost`).
pub type DeviceId = String;

/// The health dimensions a device can be probed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Reachability,
    Http,
    Port,
    Dns,
    Performance,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Reachability => "reachability",
            ProbeKind::Http => "http",
            ProbeKind::Port => "port",
            ProbeKind::Dns => "dns",
            ProbeKind::Performance => "performance",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which probes run against a device, and their parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthChecks {
    /// ICMP echo through the system `ping` utility.
    #[serde(default = "default_true")]
    pub ping: bool,
    pub http: Option<HttpCheck>,
    /// TCP ports that should accept connections.
    #[serde(default)]
    pub ports: Vec<u16>,
    pub dns: Option<DnsCheck>,
    /// CPU/memory/disk sampling over the management session.
    #[serde(default)]
    pub performance: bool,
}

impl Default for HealthChecks {
    fn default() -> Self {
        Self {
            ping: true,
            http: None,
            ports: Vec::new(),
            dns: None,
            performance: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCheck {
    pub url: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsCheck {
    #[serde(default = "default_dns_domain")]
    pub domain: String,
    /// Resolver to query. Defaults to a public resolver, or to the device
    /// itself when its `device_type` is `dns_server`.
    pub server: Option<IpAddr>,
}

/// Management credentials. Their presence enables remediation and remote
/// performance sampling.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SshCredentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// A validated device, resolved from its lab entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub ip: DeviceId,
    pub label: String,
    pub lab_id: String,
    pub device_type: Option<String>,
    pub health_checks: HealthChecks,
    pub ssh: Option<SshCredentials>,
}

impl Device {
    /// The probe whose outcome decides online/offline: reachability when
    /// enabled, otherwise HTTP.
    pub fn primary_probe(&self) -> Option<ProbeKind> {
        if self.health_checks.ping {
            Some(ProbeKind::Reachability)
        } else if self.health_checks.http.is_some() {
            Some(ProbeKind::Http)
        } else {
            None
        }
    }

    /// Enabled probes in the order they are executed and reported.
    pub fn enabled_probes(&self) -> Vec<ProbeKind> {
        let checks = &self.health_checks;
        let mut kinds = Vec::new();
        if checks.ping {
            kinds.push(ProbeKind::Reachability);
        }
        if checks.http.is_some() {
            kinds.push(ProbeKind::Http);
        }
        kinds.extend(checks.ports.iter().map(|_| ProbeKind::Port));
        if checks.dns.is_some() {
            kinds.push(ProbeKind::Dns);
        }
        if checks.performance {
            kinds.push(ProbeKind::Performance);
        }
        kinds
    }

    pub fn is_local(&self) -> bool {
        is_local_host(&self.ip)
    }

    pub fn is_dns_server(&self) -> bool {
        self.device_type.as_deref() == Some("dns_server")
    }
}

/// Whether an identity refers to the host running the monitor.
pub fn is_local_host(ip: &str) -> bool {
    matches!(ip, "localhost" | "127.0.0.1" | "::1")
}

fn default_true() -> bool {
    true
}

fn default_expected_status() -> u16 {
    200
}

fn default_dns_domain() -> String {
    "example.com".to_string()
}

fn default_ssh_port() -> u16 {
    22
}
