//! Remote operating-family detection.
//!
//! A fixed sequence of cheap diagnostic commands is run in order and the
//! first confident match wins. The interpretation is a pure function of the
//! command outputs, so identical outputs always yield the same family and an
//! unrecognised sequence always yields [`OsFamily::Unknown`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use netmend_remote::RemoteSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Windows,
    Linux,
    Unknown,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OsFamily::Windows => "windows",
            OsFamily::Linux => "linux",
            OsFamily::Unknown => "unknown",
        })
    }
}

/// One diagnostic command and how to read its stdout.
pub struct DetectionStep {
    pub command: &'static str,
    interpret: fn(&str) -> Option<OsFamily>,
}

impl DetectionStep {
    pub fn interpret(&self, stdout: &str) -> Option<OsFamily> {
        (self.interpret)(stdout)
    }
}

fn from_ver(out: &str) -> Option<OsFamily> {
    let out = out.to_ascii_lowercase();
    (out.contains("windows") || out.contains("microsoft")).then_some(OsFamily::Windows)
}

fn from_uname(out: &str) -> Option<OsFamily> {
    out.trim()
        .to_ascii_lowercase()
        .starts_with("linux")
        .then_some(OsFamily::Linux)
}

fn from_os_env(out: &str) -> Option<OsFamily> {
    // A POSIX shell echoes "%OS%" back verbatim.
    out.trim()
        .eq_ignore_ascii_case("windows_nt")
        .then_some(OsFamily::Windows)
}

fn from_os_release(out: &str) -> Option<OsFamily> {
    (!out.trim().is_empty()).then_some(OsFamily::Linux)
}

pub static DETECTION_STEPS: [DetectionStep; 4] = [
    DetectionStep {
        command: "ver",
        interpret: from_ver,
    },
    DetectionStep {
        command: "uname -s",
        interpret: from_uname,
    },
    DetectionStep {
        command: "echo %OS%",
        interpret: from_os_env,
    },
    DetectionStep {
        command: "cat /etc/os-release 2>/dev/null | head -n 1",
        interpret: from_os_release,
    },
];

/// Family implied by the outputs of [`DETECTION_STEPS`], in order. `None`
/// marks a step whose command failed to run.
pub fn classify<'a>(outputs: impl IntoIterator<Item = Option<&'a str>>) -> OsFamily {
    DETECTION_STEPS
        .iter()
        .zip(outputs)
        .find_map(|(step, out)| out.and_then(|o| step.interpret(o)))
        .unwrap_or(OsFamily::Unknown)
}

/// Run the detection sequence, stopping at the first match.
pub async fn detect_os(session: &mut dyn RemoteSession, step_timeout: Duration) -> OsFamily {
    for step in &DETECTION_STEPS {
        match session.exec(step.command, step_timeout).await {
            Ok(out) => {
                if let Some(family) = step.interpret(&out.stdout) {
                    debug!(command = step.command, %family, "os detected");
                    return family;
                }
            }
            Err(e) => debug!(command = step.command, error = %e, "detection command failed"),
        }
    }
    OsFamily::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmend_remote::{MockConnector, SessionConnector, SessionTarget};

    #[test]
    fn windows_from_ver() {
        let out = "\r\nMicrosoft Windows [Version 10.0.19045.4291]\r\n";
        assert_eq!(classify([Some(out)]), OsFamily::Windows);
    }

    #[test]
    fn linux_from_uname() {
        assert_eq!(
            classify([Some(""), Some("Linux\n")]),
            OsFamily::Linux
        );
    }

    #[test]
    fn windows_from_os_env_only_when_expanded() {
        assert_eq!(
            classify([None, None, Some("Windows_NT\r\n")]),
            OsFamily::Windows
        );
        assert_eq!(classify([None, None, Some("%OS%\n")]), OsFamily::Unknown);
    }

    #[test]
    fn linux_from_os_release() {
        assert_eq!(
            classify([Some(""), Some("FreeBSD"), Some("%OS%"), Some("NAME=\"Ubuntu\"")]),
            OsFamily::Linux
        );
    }

    #[test]
    fn unrecognised_is_unknown() {
        assert_eq!(
            classify([Some(""), Some("Darwin\n"), Some("%OS%"), Some("")]),
            OsFamily::Unknown
        );
        assert_eq!(classify(std::iter::empty()), OsFamily::Unknown);
    }

    #[test]
    fn deterministic_for_identical_outputs() {
        let outputs = [Some("x"), Some("Linux"), None, None];
        assert_eq!(classify(outputs), classify(outputs));
    }

    #[tokio::test]
    async fn detect_stops_at_first_match() {
        let mock = MockConnector::new();
        mock.respond("uname -s", "Linux\n");
        let target = SessionTarget {
            host: "h".to_string(),
            port: 22,
            username: "u".to_string(),
            password: String::new(),
        };
        let mut session = mock.connect(&target, Duration::from_secs(1)).await.unwrap();
        let family = detect_os(session.as_mut(), Duration::from_secs(1)).await;
        assert_eq!(family, OsFamily::Linux);
        assert_eq!(mock.commands(), vec!["ver", "uname -s"]);
    }
}
