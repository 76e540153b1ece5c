//! netmend-core: configuration model shared by every netmend crate.
//!
//! Parses `netmend.toml`, validates device entries, and resolves the
//! configured labs into a flat, ordered list of [`Device`]s that the
//! monitor probes every cycle.

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{DeviceSet, NetmendConfig};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
