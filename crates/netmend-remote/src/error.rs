//! Management session errors.

use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("connect to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    #[error("authentication rejected for {user}@{target}")]
    Auth { user: String, target: String },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("session closed")]
    Disconnected,
}
