//! netmendd: assembles the netmend engine for the daemon binary.

pub mod engine;
pub mod retention;

pub use engine::Engine;
pub use retention::{RETENTION_SWEEP_INTERVAL, run_retention};
