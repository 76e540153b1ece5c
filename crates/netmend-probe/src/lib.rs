//! netmend-probe: one function per health dimension.
//!
//! Probes never touch shared state and never retry. Each returns a
//! [`ProbeResult`](netmend_state::ProbeResult) carrying success, latency, and
//! a failure classification; retry and escalation belong to the monitor and
//! the healer.
//!
//! | Probe | Mechanism |
//! |---|---|
//! | reachability | system `ping`, one echo request |
//! | http | `reqwest` GET, redirects followed, self-signed certs accepted |
//! | port | TCP connect |
//! | dns | `hickory-resolver` A lookup |
//! | performance | shell one-liners over SSH, or `sysinfo` for the local host |

pub mod dns;
pub mod error;
pub mod http;
pub mod performance;
pub mod port;
pub mod prober;
pub mod reachability;

pub use error::ProbeSetupError;
pub use prober::{ProbeSettings, Prober, primary_online};
