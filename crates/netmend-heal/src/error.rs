//! Healing and remediation errors.

use thiserror::Error;

use netmend_remote::SessionError;

pub type HealingResult<T> = Result<T, HealingError>;

/// A remediation attempt that reached the device but could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemediationError {
    #[error("session failed: {0}")]
    Session(#[from] SessionError),

    #[error("cannot determine remediation strategy")]
    UnknownOs,
}

/// Why `heal_device` did not produce a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealingError {
    #[error("healing disabled")]
    Disabled,

    #[error("device not found")]
    DeviceNotFound,

    #[error("remediation not configured")]
    NotConfigured,

    #[error("max attempts reached")]
    MaxAttemptsReached,

    #[error("healing already in progress")]
    InProgress,

    #[error(transparent)]
    Remediation(#[from] RemediationError),

    #[error("state error: {0}")]
    State(String),
}

impl HealingError {
    /// The attempt was counted and a session was opened or tried.
    pub fn attempted(&self) -> bool {
        matches!(self, HealingError::Remediation(_))
    }
}

impl From<netmend_state::StateError> for HealingError {
    fn from(e: netmend_state::StateError) -> Self {
        match e {
            netmend_state::StateError::UnknownDevice(_) => HealingError::DeviceNotFound,
            other => HealingError::State(other.to_string()),
        }
    }
}
