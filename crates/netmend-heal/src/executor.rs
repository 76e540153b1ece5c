//! RemediationExecutor: one session per attempt: connect, detect, remediate,
//! always close.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use netmend_core::NetmendConfig;
use netmend_remote::{RemoteSession, SessionConnector, SessionTarget};

use crate::detect::detect_os;
use crate::error::RemediationError;
use crate::strategy::{RemediationReport, strategy_for};

#[derive(Debug, Clone)]
pub struct RemediationSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Per-command timeout of the OS detection sequence.
    pub detect_timeout: Duration,
}

impl RemediationSettings {
    pub fn from_config(config: &NetmendConfig) -> Self {
        Self {
            connect_timeout: config.healing.connect_timeout,
            command_timeout: config.healing.command_timeout,
            detect_timeout: config.healing.detect_timeout,
        }
    }
}

#[derive(Clone)]
pub struct RemediationExecutor {
    connector: Arc<dyn SessionConnector>,
    settings: RemediationSettings,
}

impl RemediationExecutor {
    pub fn new(connector: Arc<dyn SessionConnector>, settings: RemediationSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    /// Run one remediation attempt against `target`.
    ///
    /// A session that cannot be opened ends the attempt before any command
    /// runs. Once open, the session is closed whatever the outcome.
    pub async fn remediate(
        &self,
        target: &SessionTarget,
    ) -> Result<RemediationReport, RemediationError> {
        let mut session = self
            .connector
            .connect(target, self.settings.connect_timeout)
            .await
            .inspect_err(|e| warn!(target = ?target, error = %e, "remediation session failed"))?;

        let result = self.run(session.as_mut()).await;
        session.close().await;
        result
    }

    async fn run(&self, session: &mut dyn RemoteSession) -> Result<RemediationReport, RemediationError> {
        let family = detect_os(session, self.settings.detect_timeout).await;
        info!(%family, "remediation strategy selected");
        strategy_for(family)
            .remediate(session, self.settings.command_timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmend_remote::{MockConnector, SessionError};

    use crate::detect::OsFamily;
    use crate::strategy::LINUX_METHOD;

    fn settings() -> RemediationSettings {
        RemediationSettings {
            connect_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(1),
            detect_timeout: Duration::from_secs(1),
        }
    }

    fn target() -> SessionTarget {
        SessionTarget {
            host: "10.0.0.3".to_string(),
            port: 22,
            username: "admin".to_string(),
            password: "pw".to_string(),
        }
    }

    #[tokio::test]
    async fn linux_device_is_remediated_and_closed() {
        let mock = MockConnector::new();
        mock.respond("uname -s", "Linux");
        let executor = RemediationExecutor::new(Arc::new(mock.clone()), settings());

        let report = executor.remediate(&target()).await.unwrap();
        assert_eq!(report.family, OsFamily::Linux);
        assert_eq!(report.method, LINUX_METHOD);
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test]
    async fn session_failure_runs_nothing() {
        let mock = MockConnector::new();
        mock.fail_connect(SessionError::Connect {
            target: "10.0.0.3:22".to_string(),
            reason: "no route to host".to_string(),
        });
        let executor = RemediationExecutor::new(Arc::new(mock.clone()), settings());

        let err = executor.remediate(&target()).await.unwrap_err();
        assert!(matches!(err, RemediationError::Session(_)));
        assert!(err.to_string().starts_with("session failed:"));
        assert!(mock.commands().is_empty());
    }

    #[tokio::test]
    async fn unknown_os_aborts_but_still_closes() {
        let mock = MockConnector::new();
        let executor = RemediationExecutor::new(Arc::new(mock.clone()), settings());

        let err = executor.remediate(&target()).await.unwrap_err();
        assert_eq!(err, RemediationError::UnknownOs);
        assert_eq!(err.to_string(), "cannot determine remediation strategy");
        // only the detection sequence ran
        assert_eq!(mock.commands().len(), 4);
        assert_eq!(mock.close_count(), 1);
    }
}
