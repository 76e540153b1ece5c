//! Scripted in-memory sessions for tests.
//!
//! A [`MockConnector`] replays canned outputs for commands matching a
//! substring and records everything issued against it. Unmatched commands
//! succeed with empty output.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{SessionError, SessionResult};
use crate::session::{CommandOutput, RemoteSession, SessionConnector, SessionTarget};

#[derive(Default)]
struct Script {
    responses: Vec<(String, SessionResult<CommandOutput>)>,
    connect_error: Option<SessionError>,
    connects: Vec<SessionTarget>,
    commands: Vec<String>,
    detached: Vec<String>,
    closes: usize,
}

/// Connector whose sessions answer from a script.
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `stdout` and exit status 0.
    /// Earlier rules win.
    pub fn respond(&self, pattern: &str, stdout: &str) -> &Self {
        self.respond_with(
            pattern,
            Ok(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_status: Some(0),
            }),
        )
    }

    /// Answer commands containing `pattern` with a full result.
    pub fn respond_with(&self, pattern: &str, result: SessionResult<CommandOutput>) -> &Self {
        self.script.lock().responses.push((pattern.to_string(), result));
        self
    }

    /// Make every connect attempt fail with `error`.
    pub fn fail_connect(&self, error: SessionError) -> &Self {
        self.script.lock().connect_error = Some(error);
        self
    }

    /// Targets passed to `connect`, including failed attempts.
    pub fn connects(&self) -> Vec<SessionTarget> {
        self.script.lock().connects.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.script.lock().connects.len()
    }

    /// Commands run through `exec`, in order.
    pub fn commands(&self) -> Vec<String> {
        self.script.lock().commands.clone()
    }

    pub fn detached(&self) -> Vec<String> {
        self.script.lock().detached.clone()
    }

    pub fn close_count(&self) -> usize {
        self.script.lock().closes
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(
        &self,
        target: &SessionTarget,
        _timeout: Duration,
    ) -> SessionResult<Box<dyn RemoteSession>> {
        let mut script = self.script.lock();
        script.connects.push(target.clone());
        if let Some(err) = &script.connect_error {
            return Err(err.clone());
        }
        Ok(Box::new(MockSession {
            script: self.script.clone(),
        }))
    }
}

struct MockSession {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, command: &str, _timeout: Duration) -> SessionResult<CommandOutput> {
        let mut script = self.script.lock();
        script.commands.push(command.to_string());
        script
            .responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| {
                Ok(CommandOutput {
                    exit_status: Some(0),
                    ..CommandOutput::default()
                })
            })
    }

    async fn spawn_detached(&mut self, command: &str, _accept_timeout: Duration) -> SessionResult<()> {
        self.script.lock().detached.push(command.to_string());
        Ok(())
    }

    async fn close(&mut self) {
        self.script.lock().closes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SessionTarget {
        SessionTarget {
            host: "10.0.0.1".to_string(),
            port: 22,
            username: "admin".to_string(),
            password: "pw".to_string(),
        }
    }

    #[tokio::test]
    async fn replays_first_matching_rule() {
        let mock = MockConnector::new();
        mock.respond("uname", "Linux\n").respond("un", "other");
        let mut session = mock.connect(&target(), Duration::from_secs(1)).await.unwrap();

        let out = session.exec("uname -s", Duration::from_secs(1)).await.unwrap();
        assert_eq!(out.stdout_trimmed(), "Linux");
        assert!(out.success());

        let unmatched = session.exec("ver", Duration::from_secs(1)).await.unwrap();
        assert!(unmatched.stdout.is_empty());
        assert!(unmatched.success());

        session.close().await;
        assert_eq!(mock.commands(), vec!["uname -s", "ver"]);
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test]
    async fn connect_failure_is_recorded() {
        let mock = MockConnector::new();
        mock.fail_connect(SessionError::Timeout("connect".to_string()));
        let err = mock
            .connect(&target(), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert_eq!(err, SessionError::Timeout("connect".to_string()));
        assert_eq!(mock.connect_count(), 1);
        assert_eq!(mock.close_count(), 0);
    }

    #[tokio::test]
    async fn detached_commands_are_not_executed() {
        let mock = MockConnector::new();
        let mut session = mock.connect(&target(), Duration::from_secs(1)).await.unwrap();
        session
            .spawn_detached("start /b cmd", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(mock.commands().is_empty());
        assert_eq!(mock.detached(), vec!["start /b cmd"]);
    }
}
