//! netmend-heal: healing state machine and remote remediation.
//!
//! ```text
//!   Monitor ──should_trigger_healing──► Healer ──begin/finish──► DeviceStateStore
//!                                        │
//!                                        ▼
//!                              RemediationExecutor
//!                                connect ─► detect_os ─► strategy_for(family)
//!                                   │                      ├─ WindowsRemediation
//!                                   └── close (always)     ├─ LinuxRemediation
//!                                                          └─ UnknownRemediation
//! ```
//!
//! Attempts are counted when they pass the gate, before the session is
//! opened. Once the counter reaches `max_attempts` further calls are refused
//! and logged as `exhausted` until the device is observed online again.

pub mod detect;
pub mod error;
pub mod executor;
pub mod healer;
pub mod policy;
pub mod strategy;

pub use detect::{OsFamily, detect_os};
pub use error::{HealingError, HealingResult, RemediationError};
pub use executor::{RemediationExecutor, RemediationSettings};
pub use healer::{Healer, HealingReport};
pub use policy::{HealingPolicy, HealingState};
pub use strategy::{RemediationReport, RemediationStrategy, strategy_for};
