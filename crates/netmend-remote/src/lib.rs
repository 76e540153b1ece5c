//! netmend-remote: management sessions to monitored devices.
//!
//! Remediation and remote performance sampling talk to devices through the
//! [`SessionConnector`] / [`RemoteSession`] pair. [`SshConnector`] is the
//! production transport; the `mock` feature adds a scripted
//! [`MockConnector`] for tests.

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod session;
pub mod ssh;

pub use error::{SessionError, SessionResult};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockConnector;
pub use session::{CommandOutput, RemoteSession, SessionConnector, SessionTarget};
pub use ssh::SshConnector;
