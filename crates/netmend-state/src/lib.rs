//! netmend-state: device status, healing history, and persistence.
//!
//! # Architecture
//!
//! ```text
//!   Monitor (single writer)
//!      │ merge / update / begin_healing / finish_healing
//!      ▼
//!   DeviceStateStore ──snapshot()──► API, CLI (readers)
//!
//!   Healer ──append──► HealingLog (bounded ring, readers)
//!                  └─► HistoryStore (redb, optional)
//! ```
//!
//! The [`DeviceStateStore`] is the only state shared between the scheduler
//! and readers. All mutation goes through one `parking_lot::RwLock`, and
//! readers receive owned copies.
//!
//! The [`HistoryStore`] keeps probe samples, performance samples, and
//! healing entries in redb for uptime and latency queries.

pub mod error;
pub mod history;
pub mod log;
pub mod status;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use history::HistoryStore;
pub use log::{DEFAULT_LOG_CAPACITY, HealingLog};
pub use status::DeviceStateStore;
pub use types::*;
