//! Session traits shared by the SSH transport and the mock.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use netmend_core::{Device, SshCredentials};

use crate::error::SessionResult;

/// Where and as whom to open a management session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl SessionTarget {
    pub fn new(host: &str, credentials: &SshCredentials) -> Self {
        Self {
            host: host.to_string(),
            port: credentials.port,
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        }
    }

    /// Target for a device, if it has management credentials.
    pub fn for_device(device: &Device) -> Option<Self> {
        device.ssh.as_ref().map(|creds| Self::new(&device.ip, creds))
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.address())
    }
}

/// Captured output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the remote side closed the channel without reporting one.
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// An authenticated session on a remote device.
#[async_trait]
pub trait RemoteSession: Send {
    /// Run a command to completion, bounded by `timeout`.
    async fn exec(&mut self, command: &str, timeout: Duration) -> SessionResult<CommandOutput>;

    /// Start a command without waiting for it to finish. Returns once the
    /// remote side has accepted the request. `accept_timeout` bounds the
    /// whole request; a request already sent when it expires counts as
    /// started.
    async fn spawn_detached(&mut self, command: &str, accept_timeout: Duration) -> SessionResult<()>;

    /// Release the session. Never fails; errors are logged.
    async fn close(&mut self);
}

/// Opens [`RemoteSession`]s.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        target: &SessionTarget,
        timeout: Duration,
    ) -> SessionResult<Box<dyn RemoteSession>>;
}
