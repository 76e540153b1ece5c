//! netmend.toml configuration parser.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_str;
use crate::error::{ConfigError, ConfigResult};
use crate::types::{Device, DeviceId, HealthChecks, HttpCheck, SshCredentials};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetmendConfig {
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub labs: Vec<LabConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Sleep between the end of one cycle and the start of the next.
    #[serde(with = "serde_str", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(with = "serde_str", default = "default_ping_timeout")]
    pub ping_timeout: Duration,
    #[serde(with = "serde_str", default = "default_http_timeout")]
    pub http_timeout: Duration,
    #[serde(with = "serde_str", default = "default_port_timeout")]
    pub port_timeout: Duration,
    #[serde(with = "serde_str", default = "default_dns_timeout")]
    pub dns_timeout: Duration,
    /// Consecutive primary-probe failures before healing is considered.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Minimum spacing between two performance samples of one device.
    #[serde(with = "serde_str", default = "default_performance_interval")]
    pub performance_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            ping_timeout: default_ping_timeout(),
            http_timeout: default_http_timeout(),
            port_timeout: default_port_timeout(),
            dns_timeout: default_dns_timeout(),
            failure_threshold: default_failure_threshold(),
            performance_interval: default_performance_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Settle time after an attempt before the next device is processed.
    #[serde(with = "serde_str", default = "default_wait_between_attempts")]
    pub wait_between_attempts: Duration,
    #[serde(with = "serde_str", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "serde_str", default = "default_command_timeout")]
    pub command_timeout: Duration,
    /// Per-command timeout for the OS detection probes.
    #[serde(with = "serde_str", default = "default_detect_timeout")]
    pub detect_timeout: Duration,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            wait_between_attempts: default_wait_between_attempts(),
            connect_timeout: default_connect_timeout(),
            command_timeout: default_command_timeout(),
            detect_timeout: default_detect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// History database. No history is kept when unset.
    pub path: Option<PathBuf>,
    #[serde(with = "serde_str", default = "default_retention")]
    pub retention: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            retention: default_retention(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub ip: String,
    pub label: String,
    pub device_type: Option<String>,
    #[serde(default)]
    pub health_checks: HealthChecks,
    pub ssh: Option<SshCredentials>,
}

/// Devices resolved from the configuration, plus the entries that were
/// rejected and skipped.
#[derive(Debug, Default)]
pub struct DeviceSet {
    pub devices: Vec<Device>,
    pub rejected: Vec<ConfigError>,
}

impl NetmendConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate global settings. Device entries are validated
    /// separately by [`NetmendConfig::devices`] so one bad entry never
    /// rejects the whole file.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: NetmendConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.monitoring.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "monitoring.failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.monitoring.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "monitoring.poll_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.healing.enabled && self.healing.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "healing.max_attempts",
                reason: "must be at least 1 when healing is enabled".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve every lab's devices in configuration order, skipping
    /// invalid and duplicate entries.
    pub fn devices(&self) -> DeviceSet {
        let mut set = DeviceSet::default();
        let mut seen: HashSet<DeviceId> = HashSet::new();

        for lab in &self.labs {
            for entry in &lab.devices {
                match entry.resolve(&lab.id) {
                    Ok(device) => {
                        if seen.insert(device.ip.clone()) {
                            set.devices.push(device);
                        } else {
                            set.rejected.push(ConfigError::DuplicateIdentity(device.ip));
                        }
                    }
                    Err(e) => set.rejected.push(e),
                }
            }
        }
        set
    }

    /// A minimal configuration with one lab and one device.
    pub fn scaffold(lab_id: &str, ip: &str, label: &str) -> Self {
        NetmendConfig {
            monitoring: MonitoringConfig::default(),
            healing: HealingConfig::default(),
            storage: StorageConfig {
                path: Some(PathBuf::from("netmend.redb")),
                retention: default_retention(),
            },
            api: ApiConfig::default(),
            labs: vec![LabConfig {
                id: lab_id.to_string(),
                name: lab_id.to_string(),
                location: String::new(),
                description: String::new(),
                devices: vec![DeviceConfig {
                    ip: ip.to_string(),
                    label: label.to_string(),
                    device_type: None,
                    health_checks: HealthChecks {
                        http: Some(HttpCheck {
                            url: format!("http://{ip}/"),
                            expected_status: 200,
                        }),
                        ..HealthChecks::default()
                    },
                    ssh: None,
                }],
            }],
        }
    }
}

impl DeviceConfig {
    fn resolve(&self, lab_id: &str) -> ConfigResult<Device> {
        let ip = self.ip.trim().to_string();
        if ip.is_empty() {
            return Err(ConfigError::EmptyIdentity {
                lab_id: lab_id.to_string(),
                label: self.label.clone(),
            });
        }
        if let Some(http) = &self.health_checks.http {
            if http.url.trim().is_empty() {
                return Err(ConfigError::MissingHttpUrl(ip));
            }
        }
        if let Some(ssh) = &self.ssh {
            if ssh.username.trim().is_empty() {
                return Err(ConfigError::MissingSshUsername(ip));
            }
        }

        let device = Device {
            ip,
            label: self.label.clone(),
            lab_id: lab_id.to_string(),
            device_type: self.device_type.clone(),
            health_checks: self.health_checks.clone(),
            ssh: self.ssh.clone(),
        };
        if device.primary_probe().is_none() {
            return Err(ConfigError::NoPrimaryProbe(device.ip));
        }
        Ok(device)
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_ping_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_port_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_dns_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_performance_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_wait_between_attempts() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_detect_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_retention() -> Duration {
    Duration::from_secs(30 * 86_400)
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[monitoring]
poll_interval = "10s"
failure_threshold = 2

[healing]
max_attempts = 2
wait_between_attempts = "500ms"

[[labs]]
id = "lab_1"
name = "Networking Lab"

[[labs.devices]]
ip = "172.20.1.105"
label = "win-client"
ssh = { username = "admin", password = "secret" }

[[labs.devices]]
ip = "172.20.1.20"
label = "web"
health_checks = { ping = false, http = { url = "https://172.20.1.20/" }, ports = [22, 443] }

[[labs]]
id = "lab_2"

[[labs.devices]]
ip = "127.0.0.1"
label = "monitor-host"
health_checks = { performance = true }
"#;

    #[test]
    fn test_parse_sample() {
        let config = NetmendConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.monitoring.poll_interval, Duration::from_secs(10));
        assert_eq!(config.monitoring.failure_threshold, 2);
        assert_eq!(config.monitoring.ping_timeout, Duration::from_secs(2));
        assert_eq!(config.healing.max_attempts, 2);
        assert_eq!(config.healing.wait_between_attempts, Duration::from_millis(500));
        assert!(config.healing.enabled);
        assert_eq!(config.labs.len(), 2);
    }

    #[test]
    fn test_devices_keep_configuration_order() {
        let config = NetmendConfig::parse(SAMPLE).unwrap();
        let set = config.devices();
        assert!(set.rejected.is_empty());
        let ips: Vec<&str> = set.devices.iter().map(|d| d.ip.as_str()).collect();
        assert_eq!(ips, vec!["172.20.1.105", "172.20.1.20", "127.0.0.1"]);
        assert_eq!(set.devices[2].lab_id, "lab_2");
        assert_eq!(set.devices[0].ssh.as_ref().unwrap().port, 22);
        assert_eq!(
            set.devices[1].health_checks.http.as_ref().unwrap().expected_status,
            200
        );
    }

    #[test]
    fn test_parse_minimal() {
        let config = NetmendConfig::parse("").unwrap();
        assert!(config.labs.is_empty());
        assert_eq!(config.monitoring.failure_threshold, 3);
        assert_eq!(config.healing.max_attempts, 3);
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn test_invalid_devices_are_skipped_not_fatal() {
        let toml_str = r#"
[[labs]]
id = "lab"

[[labs.devices]]
ip = ""
label = "nameless"

[[labs.devices]]
ip = "10.0.0.1"
label = "ports-only"
health_checks = { ping = false, ports = [22] }

[[labs.devices]]
ip = "10.0.0.2"
label = "ok"

[[labs.devices]]
ip = "10.0.0.2"
label = "dup"

[[labs.devices]]
ip = "10.0.0.3"
label = "bad-ssh"
ssh = { username = " " }
"#;
        let config = NetmendConfig::parse(toml_str).unwrap();
        let set = config.devices();
        assert_eq!(set.devices.len(), 1);
        assert_eq!(set.devices[0].label, "ok");
        assert_eq!(set.rejected.len(), 4);
        assert!(matches!(set.rejected[0], ConfigError::EmptyIdentity { .. }));
        assert!(matches!(set.rejected[1], ConfigError::NoPrimaryProbe(_)));
        assert!(matches!(set.rejected[2], ConfigError::DuplicateIdentity(_)));
        assert!(matches!(set.rejected[3], ConfigError::MissingSshUsername(_)));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err = NetmendConfig::parse("[monitoring]\nfailure_threshold = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "monitoring.failure_threshold", .. }));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let err = NetmendConfig::parse("[monitoring]\npoll_interval = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_scaffold_round_trips() {
        let config = NetmendConfig::scaffold("lab_1", "10.0.0.9", "switch");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("10.0.0.9"));
        let parsed = NetmendConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.devices().devices.len(), 1);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netmend.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = NetmendConfig::from_file(&path).unwrap();
        assert_eq!(config.devices().devices.len(), 3);

        let missing = NetmendConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read(_))));
    }

    #[test]
    fn test_example_file_is_valid() {
        let config = NetmendConfig::parse(include_str!("../../../netmend.example.toml")).unwrap();
        let set = config.devices();
        assert!(set.rejected.is_empty());
        assert_eq!(set.devices.len(), 3);
        assert!(set.devices[1].is_dns_server());
        assert_eq!(set.devices[2].primary_probe(), Some(crate::types::ProbeKind::Http));
        assert_eq!(config.storage.retention, Duration::from_secs(30 * 86_400));
    }
}
