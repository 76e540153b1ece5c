//! Family-specific remediation sequences.
//!
//! Every command is best-effort: a failing step is recorded and the
//! sequence continues. Only the session itself failing is fatal, and that is
//! handled by the executor before a strategy runs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use netmend_remote::RemoteSession;

use crate::detect::OsFamily;
use crate::error::RemediationError;

pub const WINDOWS_METHOD: &str = "Windows firewall + network cache reset";
pub const LINUX_METHOD: &str = "Linux firewall + network cache reset";

/// How long to wait for the remote side to accept a detached command.
pub const DETACH_ACCEPT_TIMEOUT: Duration = Duration::from_secs(2);

/// One command of a remediation sequence and how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub command: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
}

/// What a strategy did on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationReport {
    pub family: OsFamily,
    pub method: String,
    pub steps: Vec<StepOutcome>,
    /// Advisory check run after the sequence. `None` when it could not run.
    pub verified: Option<bool>,
    pub notes: Vec<String>,
}

impl RemediationReport {
    fn new(family: OsFamily, method: &str) -> Self {
        Self {
            family,
            method: method.to_string(),
            steps: Vec::new(),
            verified: None,
            notes: Vec::new(),
        }
    }

    /// One-line summary for the healing log.
    pub fn summary(&self) -> String {
        let ok = self.steps.iter().filter(|s| s.ok).count();
        let verification = match self.verified {
            Some(true) => "passed",
            Some(false) => "failed (device may still be settling)",
            None => "not run",
        };
        let mut line = format!(
            "{} remediation: {ok}/{} commands ok; verification {verification}",
            self.family,
            self.steps.len()
        );
        for note in &self.notes {
            line.push_str("; ");
            line.push_str(note);
        }
        line
    }

    async fn run(&mut self, session: &mut dyn RemoteSession, command: &str, timeout: Duration) {
        let step = match session.exec(command, timeout).await {
            Ok(out) => {
                let ok = out.success();
                if !ok {
                    warn!(%command, exit = ?out.exit_status, "remediation command failed");
                }
                StepOutcome {
                    command: command.to_string(),
                    ok,
                    output: first_line(if ok { &out.stdout } else { &out.stderr }),
                }
            }
            Err(e) => {
                warn!(%command, error = %e, "remediation command failed");
                StepOutcome {
                    command: command.to_string(),
                    ok: false,
                    output: e.to_string(),
                }
            }
        };
        self.steps.push(step);
    }
}

fn first_line(s: &str) -> String {
    s.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// A fixed corrective sequence for one operating family.
#[async_trait]
pub trait RemediationStrategy: Send + Sync {
    fn family(&self) -> OsFamily;

    async fn remediate(
        &self,
        session: &mut dyn RemoteSession,
        command_timeout: Duration,
    ) -> Result<RemediationReport, RemediationError>;
}

pub fn strategy_for(family: OsFamily) -> Box<dyn RemediationStrategy> {
    match family {
        OsFamily::Windows => Box::new(WindowsRemediation),
        OsFamily::Linux => Box::new(LinuxRemediation),
        OsFamily::Unknown => Box::new(UnknownRemediation),
    }
}

// ── Windows ────────────────────────────────────────────────────────

const WINDOWS_FIREWALL: &[&str] = &[
    r#"netsh advfirewall firewall delete rule name="Block ICMP" protocol=icmpv4:8,any"#,
    r#"netsh advfirewall firewall delete rule name="Block Ping Test" protocol=icmpv4:8,any"#,
    r#"netsh advfirewall firewall add rule name="Allow ICMP" protocol=icmpv4:8,any dir=in action=allow"#,
];

const WINDOWS_NETWORK_RESET: &[&str] = &[
    "ipconfig /flushdns",
    "netsh int ip reset",
    "netsh winsock reset",
];

const WINDOWS_ADAPTERS_JSON: &str =
    r#"powershell -Command "Get-NetAdapter | Select-Object Name, Status | ConvertTo-Json""#;
const WINDOWS_ADAPTER_NAMES: &str =
    r#"powershell -Command "Get-NetAdapter | Select-Object -ExpandProperty Name""#;
const WINDOWS_VERIFY: &str = r#"netsh advfirewall firewall show rule name="Allow ICMP""#;

const COMMON_ADAPTERS: &[&str] = &[
    "Wi-Fi",
    "Ethernet",
    "Ethernet 2",
    "Ethernet 3",
    "Local Area Connection",
];
pub const DEFAULT_ADAPTER: &str = "Wi-Fi";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Adapter {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Status", default)]
    pub status: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Adapter),
    Many(Vec<Adapter>),
}

/// Adapters from `ConvertTo-Json` output, which is a bare object when
/// there is exactly one adapter.
pub fn parse_adapters(json: &str) -> Vec<Adapter> {
    match serde_json::from_str::<OneOrMany>(json.trim()) {
        Ok(OneOrMany::One(adapter)) => vec![adapter],
        Ok(OneOrMany::Many(adapters)) => adapters,
        Err(_) => Vec::new(),
    }
}

/// The adapter to bounce: the one that is up, else a common name that
/// exists, else the first adapter, else [`DEFAULT_ADAPTER`].
pub fn choose_adapter(adapters: &[Adapter]) -> String {
    if let Some(up) = adapters.iter().find(|a| {
        a.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("up"))
    }) {
        return up.name.clone();
    }
    for common in COMMON_ADAPTERS {
        if adapters.iter().any(|a| a.name == *common) {
            return common.to_string();
        }
    }
    adapters
        .first()
        .map(|a| a.name.clone())
        .unwrap_or_else(|| DEFAULT_ADAPTER.to_string())
}

/// Disable and re-enable an adapter in a background process so the session
/// that issues it is not cut off mid-command.
pub fn adapter_bounce_command(adapter: &str) -> String {
    let name = adapter.replace('\'', "''");
    format!(
        "start /b cmd /c \"powershell -Command \\\"Start-Sleep -Seconds 2; \
         Disable-NetAdapter -Name '{name}' -Confirm:$false; Start-Sleep -Seconds 3; \
         Enable-NetAdapter -Name '{name}' -Confirm:$false\\\"\""
    )
}

pub struct WindowsRemediation;

impl WindowsRemediation {
    async fn find_adapter(&self, session: &mut dyn RemoteSession, timeout: Duration) -> String {
        let mut adapters = match session.exec(WINDOWS_ADAPTERS_JSON, timeout).await {
            Ok(out) => parse_adapters(&out.stdout),
            Err(e) => {
                debug!(error = %e, "adapter query failed");
                Vec::new()
            }
        };
        if adapters.is_empty() {
            if let Ok(out) = session.exec(WINDOWS_ADAPTER_NAMES, timeout).await {
                adapters = out
                    .stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|name| Adapter {
                        name: name.to_string(),
                        status: None,
                    })
                    .collect();
            }
        }
        choose_adapter(&adapters)
    }
}

#[async_trait]
impl RemediationStrategy for WindowsRemediation {
    fn family(&self) -> OsFamily {
        OsFamily::Windows
    }

    async fn remediate(
        &self,
        session: &mut dyn RemoteSession,
        command_timeout: Duration,
    ) -> Result<RemediationReport, RemediationError> {
        let mut report = RemediationReport::new(OsFamily::Windows, WINDOWS_METHOD);

        for command in WINDOWS_FIREWALL.iter().chain(WINDOWS_NETWORK_RESET) {
            report.run(session, command, command_timeout).await;
        }

        let adapter = self.find_adapter(session, command_timeout).await;
        let bounce = adapter_bounce_command(&adapter);
        match session.spawn_detached(&bounce, DETACH_ACCEPT_TIMEOUT).await {
            Ok(()) => report.notes.push(format!("adapter '{adapter}' restart scheduled")),
            Err(e) => {
                warn!(%adapter, error = %e, "could not schedule adapter restart");
                report.notes.push(format!("adapter '{adapter}' restart not scheduled: {e}"));
            }
        }

        report.verified = session
            .exec(WINDOWS_VERIFY, command_timeout)
            .await
            .ok()
            .map(|out| out.stdout.contains("Allow ICMP"));
        Ok(report)
    }
}

// ── Linux ──────────────────────────────────────────────────────────

const LINUX_SEQUENCE: &[&str] = &[
    "sudo -n iptables -D INPUT -p icmp --icmp-type echo-request -j DROP 2>/dev/null || true",
    "sudo -n iptables -D INPUT -p icmp -j DROP 2>/dev/null || true",
    "sudo -n iptables -I INPUT -p icmp --icmp-type echo-request -j ACCEPT",
    "sudo -n iptables -I INPUT -p icmp -j ACCEPT",
    "sudo -n ip route flush cache",
    "sudo -n systemctl restart systemd-resolved 2>/dev/null || true",
];

const LINUX_CONNECTIVITY: &str = "ping -c 2 8.8.8.8";
const LINUX_VERIFY: &str = "sudo -n iptables -C INPUT -p icmp --icmp-type echo-request -j ACCEPT";

pub struct LinuxRemediation;

#[async_trait]
impl RemediationStrategy for LinuxRemediation {
    fn family(&self) -> OsFamily {
        OsFamily::Linux
    }

    async fn remediate(
        &self,
        session: &mut dyn RemoteSession,
        command_timeout: Duration,
    ) -> Result<RemediationReport, RemediationError> {
        let mut report = RemediationReport::new(OsFamily::Linux, LINUX_METHOD);

        for command in LINUX_SEQUENCE {
            report.run(session, command, command_timeout).await;
        }

        // Diagnostic only.
        let outbound = session
            .exec(LINUX_CONNECTIVITY, command_timeout)
            .await
            .is_ok_and(|out| out.success());
        report.notes.push(format!(
            "outbound connectivity {}",
            if outbound { "ok" } else { "failed" }
        ));

        report.verified = session
            .exec(LINUX_VERIFY, command_timeout)
            .await
            .ok()
            .map(|out| out.success());
        Ok(report)
    }
}

// ── Unknown ────────────────────────────────────────────────────────

pub struct UnknownRemediation;

#[async_trait]
impl RemediationStrategy for UnknownRemediation {
    fn family(&self) -> OsFamily {
        OsFamily::Unknown
    }

    async fn remediate(
        &self,
        _session: &mut dyn RemoteSession,
        _command_timeout: Duration,
    ) -> Result<RemediationReport, RemediationError> {
        Err(RemediationError::UnknownOs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmend_remote::{CommandOutput, MockConnector, SessionConnector, SessionError, SessionTarget};

    const T: Duration = Duration::from_secs(1);

    fn target() -> SessionTarget {
        SessionTarget {
            host: "10.0.0.2".to_string(),
            port: 22,
            username: "admin".to_string(),
            password: "pw".to_string(),
        }
    }

    fn adapter(name: &str, status: &str) -> Adapter {
        Adapter {
            name: name.to_string(),
            status: Some(status.to_string()),
        }
    }

    #[test]
    fn parse_single_and_multiple_adapters() {
        let one = parse_adapters(r#"{"Name":"Ethernet","Status":"Up"}"#);
        assert_eq!(one, vec![adapter("Ethernet", "Up")]);

        let many = parse_adapters(
            r#"[{"Name":"Wi-Fi","Status":"Disconnected"},{"Name":"Ethernet 2","Status":"Up"}]"#,
        );
        assert_eq!(many.len(), 2);
        assert!(parse_adapters("not json").is_empty());
    }

    #[test]
    fn adapter_choice_order() {
        assert_eq!(
            choose_adapter(&[adapter("vEthernet", "Disconnected"), adapter("Ethernet 2", "Up")]),
            "Ethernet 2"
        );
        assert_eq!(
            choose_adapter(&[adapter("vEthernet", "Disabled"), adapter("Ethernet", "Disabled")]),
            "Ethernet"
        );
        assert_eq!(choose_adapter(&[adapter("Team0", "Disabled")]), "Team0");
        assert_eq!(choose_adapter(&[]), DEFAULT_ADAPTER);
    }

    #[test]
    fn bounce_command_escapes_quotes() {
        let cmd = adapter_bounce_command("Bob's NIC");
        assert!(cmd.starts_with("start /b cmd /c"));
        assert!(cmd.contains("Disable-NetAdapter -Name 'Bob''s NIC'"));
        assert!(cmd.contains("Enable-NetAdapter -Name 'Bob''s NIC'"));
    }

    #[test]
    fn summary_mentions_verification() {
        let mut report = RemediationReport::new(OsFamily::Linux, LINUX_METHOD);
        report.steps.push(StepOutcome {
            command: "x".to_string(),
            ok: true,
            output: String::new(),
        });
        report.verified = Some(false);
        let summary = report.summary();
        assert!(summary.starts_with("linux remediation: 1/1 commands ok"));
        assert!(summary.contains("verification failed"));
    }

    #[tokio::test]
    async fn windows_sequence_detaches_adapter_bounce() {
        let mock = MockConnector::new();
        mock.respond("ConvertTo-Json", r#"[{"Name":"Ethernet","Status":"Up"}]"#)
            .respond("show rule", "Rule Name: Allow ICMP");
        let mut session = mock.connect(&target(), T).await.unwrap();

        let report = WindowsRemediation.remediate(session.as_mut(), T).await.unwrap();
        assert_eq!(report.method, WINDOWS_METHOD);
        assert_eq!(report.steps.len(), 6);
        assert_eq!(report.verified, Some(true));

        let detached = mock.detached();
        assert_eq!(detached.len(), 1);
        assert!(detached[0].contains("'Ethernet'"));
        // the bounce never runs synchronously
        assert!(!mock.commands().iter().any(|c| c.contains("Disable-NetAdapter")));
    }

    #[tokio::test]
    async fn windows_falls_back_to_adapter_names() {
        let mock = MockConnector::new();
        mock.respond("ExpandProperty Name", "Ethernet 3\r\nBluetooth\r\n");
        let mut session = mock.connect(&target(), T).await.unwrap();

        WindowsRemediation.remediate(session.as_mut(), T).await.unwrap();
        assert!(mock.detached()[0].contains("'Ethernet 3'"));
    }

    #[tokio::test]
    async fn linux_tolerates_failing_commands() {
        let mock = MockConnector::new();
        mock.respond_with(
            "ip route flush",
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: "sudo: a password is required\n".to_string(),
                exit_status: Some(1),
            }),
        )
        .respond_with("systemd-resolved", Err(SessionError::Timeout("command".to_string())))
        .respond_with(
            "iptables -C",
            Ok(CommandOutput {
                exit_status: Some(1),
                ..CommandOutput::default()
            }),
        );
        let mut session = mock.connect(&target(), T).await.unwrap();

        let report = LinuxRemediation.remediate(session.as_mut(), T).await.unwrap();
        assert_eq!(report.steps.len(), LINUX_SEQUENCE.len());
        assert_eq!(report.steps.iter().filter(|s| !s.ok).count(), 2);
        assert_eq!(report.steps[4].output, "sudo: a password is required");
        assert_eq!(report.verified, Some(false));
        assert!(mock.commands().contains(&LINUX_CONNECTIVITY.to_string()));
    }

    #[tokio::test]
    async fn unknown_family_refuses() {
        let mock = MockConnector::new();
        let mut session = mock.connect(&target(), T).await.unwrap();
        let err = strategy_for(OsFamily::Unknown)
            .remediate(session.as_mut(), T)
            .await
            .unwrap_err();
        assert_eq!(err, RemediationError::UnknownOs);
        assert!(mock.commands().is_empty());
    }
}
