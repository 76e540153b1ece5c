//! SSH transport built on russh, password authentication only.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::session::{CommandOutput, RemoteSession, SessionConnector, SessionTarget};

/// Lab devices are reinstalled often, so host keys are accepted on first use.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

fn channel_err(e: russh::Error) -> SessionError {
    SessionError::Channel(e.to_string())
}

/// Bounds a whole detached request (open, exec, acknowledgement) by `limit`.
///
/// Once `sent` is set the command is on the wire, so running out of time
/// waiting for the acknowledgement still counts as started.
async fn bounded_detached<F>(limit: Duration, sent: &AtomicBool, request: F) -> SessionResult<()>
where
    F: Future<Output = SessionResult<()>>,
{
    match timeout(limit, request).await {
        Ok(result) => result,
        Err(_) if sent.load(Ordering::Acquire) => Ok(()),
        Err(_) => Err(SessionError::Timeout("detached command request".to_string())),
    }
}

/// Opens SSH sessions.
#[derive(Clone)]
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl SshConnector {
    /// `inactivity_timeout` bounds how long an idle session is kept open.
    pub fn new(inactivity_timeout: Duration) -> Self {
        let config = client::Config {
            inactivity_timeout: Some(inactivity_timeout),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    async fn connect(
        &self,
        target: &SessionTarget,
        connect_timeout: Duration,
    ) -> SessionResult<Box<dyn RemoteSession>> {
        let address = target.address();
        debug!(%address, user = %target.username, "opening ssh session");

        let mut handle = timeout(
            connect_timeout,
            client::connect(
                self.config.clone(),
                (target.host.as_str(), target.port),
                AcceptAnyHostKey,
            ),
        )
        .await
        .map_err(|_| SessionError::Timeout(format!("connect to {address}")))?
        .map_err(|e| SessionError::Connect {
            target: address.clone(),
            reason: e.to_string(),
        })?;

        let authenticated = timeout(
            connect_timeout,
            handle.authenticate_password(&target.username, &target.password),
        )
        .await
        .map_err(|_| SessionError::Timeout(format!("authenticate to {address}")))?
        .map_err(|e| SessionError::Connect {
            target: address.clone(),
            reason: e.to_string(),
        })?;

        if !authenticated {
            return Err(SessionError::Auth {
                user: target.username.clone(),
                target: address,
            });
        }

        Ok(Box::new(SshSession { handle, address }))
    }
}

struct SshSession {
    handle: Handle<AcceptAnyHostKey>,
    address: String,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, command: &str, limit: Duration) -> SessionResult<CommandOutput> {
        let run = async {
            let mut channel = self.handle.channel_open_session().await.map_err(channel_err)?;
            channel.exec(true, command).await.map_err(channel_err)?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_status = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                    // ext 1 is SSH_EXTENDED_DATA_STDERR
                    ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                    ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                    _ => {}
                }
            }
            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_status,
            })
        };

        let output = timeout(limit, run)
            .await
            .map_err(|_| SessionError::Timeout(format!("command {command:?}")))?;
        if let Ok(out) = &output {
            debug!(address = %self.address, %command, exit = ?out.exit_status, "command finished");
        }
        output
    }

    async fn spawn_detached(&mut self, command: &str, accept_timeout: Duration) -> SessionResult<()> {
        let sent = AtomicBool::new(false);
        let request = async {
            let mut channel = self.handle.channel_open_session().await.map_err(channel_err)?;
            channel.exec(true, command).await.map_err(channel_err)?;
            sent.store(true, Ordering::Release);

            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Success => return Ok(()),
                    ChannelMsg::Failure => {
                        return Err(SessionError::Channel("exec request refused".to_string()));
                    }
                    _ => {}
                }
            }
            Ok(())
        };

        let result = bounded_detached(accept_timeout, &sent, request).await;
        if result.is_ok() && sent.load(Ordering::Acquire) {
            debug!(address = %self.address, %command, "detached command started");
        }
        result
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            warn!(address = %self.address, error = %e, "ssh disconnect failed");
        }
    }
}
