//! redb table definitions for the history store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).
//! Timestamps in keys are zero-padded so lexical order is time order.

use redb::TableDefinition;

/// Per-cycle probe samples keyed by `{ip}/{epoch:020}`.
pub const PROBE_SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("probe_samples");

/// Performance samples keyed by `{ip}/{epoch:020}`.
pub const PERFORMANCE_SAMPLES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("performance_samples");

/// Healing log entries keyed by `{epoch:020}/{ip}/{seq}`.
pub const HEALING_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("healing_log");
