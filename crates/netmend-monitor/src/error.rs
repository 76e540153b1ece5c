//! Monitor error types.

use thiserror::Error;

/// Errors that end a monitoring cycle early.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(#[from] netmend_core::ConfigError),

    #[error("state store error: {0}")]
    State(#[from] netmend_state::StateError),

    #[error("probe setup error: {0}")]
    ProbeSetup(#[from] netmend_probe::ProbeSetupError),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
