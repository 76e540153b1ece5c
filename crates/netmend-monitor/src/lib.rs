//! netmend-monitor: the monitoring scheduler.
//!
//! ```text
//!   ConfigSource ──reload──► Monitor ──probe──► Prober
//!                               │
//!                               ├──update──► DeviceStateStore ◄── readers (API)
//!                               ├──notify──► TransitionCallback
//!                               └──heal────► Healer ──► RemediationExecutor
//! ```
//!
//! A single task owns the loop and processes devices one at a time in
//! configuration order. Healing a device blocks the rest of that cycle.

pub mod error;
pub mod monitor;
pub mod source;

pub use error::{MonitorError, MonitorResult};
pub use monitor::{
    CycleReport, ERROR_BACKOFF, Monitor, MonitorPhase, MonitorSettings, Transition,
    TransitionCallback,
};
pub use source::{ConfigSource, FileConfigSource, StaticConfigSource};
