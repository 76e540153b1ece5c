//! Probe setup errors. Probe outcomes themselves are never errors; they are
//! reported as [`ProbeResult`](netmend_state::ProbeResult)s.

use std::io;

use thiserror::Error;

use netmend_state::ProbeError;

#[derive(Debug, Error)]
pub enum ProbeSetupError {
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Map a socket error onto the probe failure taxonomy.
pub(crate) fn classify_io(e: &io::Error) -> ProbeError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ProbeError::ConnectionRefused,
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            ProbeError::ConnectionReset
        }
        io::ErrorKind::TimedOut => ProbeError::Timeout,
        _ => ProbeError::Unreachable(e.to_string()),
    }
}
