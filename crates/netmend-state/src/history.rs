//! HistoryStore: redb-backed time series of probe samples, performance
//! samples, and healing log entries.
//!
//! Values are JSON-serialized into `&[u8]` columns. Sample keys start with
//! the device identity so a device's history is one contiguous key range.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn sample_key(ip: &str, timestamp: u64) -> String {
    format!("{ip}/{timestamp:020}")
}

/// Key range `[{ip}/{since}, {ip}0)` covering one device's samples.
fn device_range(ip: &str, since: u64) -> (String, String) {
    (sample_key(ip, since), format!("{ip}0"))
}

fn sample_key_timestamp(key: &str) -> Option<u64> {
    key.rsplit('/').next()?.parse().ok()
}

fn healing_key_timestamp(key: &str) -> Option<u64> {
    key.split('/').next()?.parse().ok()
}

/// Persistent history backed by redb.
#[derive(Clone)]
pub struct HistoryStore {
    db: Arc<Database>,
}

impl HistoryStore {
    /// Open (or create) a history database at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "history store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory history store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(PROBE_SAMPLES).map_err(map_err!(Table))?;
        txn.open_table(PERFORMANCE_SAMPLES).map_err(map_err!(Table))?;
        txn.open_table(HEALING_LOG).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &[u8],
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Records in `[{ip}/{since}, {ip}0)`, newest first when `newest_first`.
    fn scan_device<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        ip: &str,
        since: u64,
        limit: usize,
        newest_first: bool,
    ) -> StateResult<Vec<T>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (start, end) = device_range(ip, since);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let range = table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?;

        let mut results = Vec::new();
        let mut push = |value: &[u8]| -> StateResult<bool> {
            results.push(serde_json::from_slice(value).map_err(map_err!(Deserialize))?);
            Ok(results.len() < limit)
        };
        if newest_first {
            for entry in range.rev() {
                let (_, value) = entry.map_err(map_err!(Read))?;
                if !push(value.value())? {
                    break;
                }
            }
        } else {
            for entry in range {
                let (_, value) = entry.map_err(map_err!(Read))?;
                if !push(value.value())? {
                    break;
                }
            }
        }
        Ok(results)
    }

    // ── Probe samples ──────────────────────────────────────────────

    pub fn record_probe(&self, sample: &ProbeSample) -> StateResult<()> {
        let key = sample_key(&sample.ip, sample.timestamp);
        let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
        self.put(PROBE_SAMPLES, &key, &value)
    }

    /// Most recent probe samples for a device taken at or after `since`,
    /// newest first.
    pub fn list_probe_samples(
        &self,
        ip: &str,
        since: u64,
        limit: usize,
    ) -> StateResult<Vec<ProbeSample>> {
        self.scan_device(PROBE_SAMPLES, ip, since, limit, true)
    }

    /// Share of samples since `since` in which the device was online.
    /// `None` when there are no samples in the window.
    pub fn uptime_percent(&self, ip: &str, since: u64) -> StateResult<Option<f64>> {
        let samples: Vec<ProbeSample> =
            self.scan_device(PROBE_SAMPLES, ip, since, usize::MAX, false)?;
        if samples.is_empty() {
            return Ok(None);
        }
        let online = samples.iter().filter(|s| s.online).count();
        Ok(Some(online as f64 * 100.0 / samples.len() as f64))
    }

    pub fn latency_stats(&self, ip: &str, since: u64) -> StateResult<LatencyStats> {
        let samples: Vec<ProbeSample> =
            self.scan_device(PROBE_SAMPLES, ip, since, usize::MAX, false)?;
        Ok(latency_stats(samples.iter().filter_map(|s| s.latency_ms)))
    }

    /// Uptime per device of one lab since `since`, ordered by identity.
    pub fn lab_summary(&self, lab_id: &str, since: u64) -> StateResult<Vec<DeviceUptime>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROBE_SAMPLES).map_err(map_err!(Table))?;

        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<ProbeSample>> = HashMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let sample: ProbeSample =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if sample.lab_id != lab_id || sample.timestamp < since {
                continue;
            }
            if !grouped.contains_key(&sample.ip) {
                order.push(sample.ip.clone());
            }
            grouped.entry(sample.ip.clone()).or_default().push(sample);
        }

        Ok(order
            .into_iter()
            .filter_map(|ip| {
                let samples = grouped.remove(&ip)?;
                let total = samples.len() as u64;
                let online = samples.iter().filter(|s| s.online).count() as u64;
                let stats = latency_stats(samples.iter().filter_map(|s| s.latency_ms));
                Some(DeviceUptime {
                    label: samples.last().map(|s| s.label.clone()).unwrap_or_default(),
                    ip,
                    samples: total,
                    online_samples: online,
                    uptime_percent: online as f64 * 100.0 / total as f64,
                    avg_latency_ms: stats.avg_ms,
                })
            })
            .collect())
    }

    // ── Performance samples ────────────────────────────────────────

    pub fn record_performance(&self, record: &PerformanceRecord) -> StateResult<()> {
        let key = sample_key(&record.ip, record.timestamp);
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        self.put(PERFORMANCE_SAMPLES, &key, &value)
    }

    /// Most recent performance samples for a device taken at or after
    /// `since`, newest first.
    pub fn list_performance(
        &self,
        ip: &str,
        since: u64,
        limit: usize,
    ) -> StateResult<Vec<PerformanceRecord>> {
        self.scan_device(PERFORMANCE_SAMPLES, ip, since, limit, true)
    }

    // ── Healing log ────────────────────────────────────────────────

    pub fn append_healing(&self, entry: &HealingLogEntry) -> StateResult<()> {
        let value = serde_json::to_vec(entry).map_err(map_err!(Serialize))?;
        let base = format!("{:020}/{}", entry.timestamp, entry.ip);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HEALING_LOG).map_err(map_err!(Table))?;
            // Several entries for one device can land in the same second.
            let mut seq = 0u32;
            let mut key = format!("{base}/{seq:04}");
            while table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                seq += 1;
                key = format!("{base}/{seq:04}");
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Most recent healing entries across all devices, newest first.
    pub fn list_healing(&self, limit: usize) -> StateResult<Vec<HealingLogEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HEALING_LOG).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    // ── Retention ──────────────────────────────────────────────────

    /// Delete every record older than `cutoff`. Returns the number removed.
    pub fn prune_before(&self, cutoff: u64) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0u64;
        {
            let tables: [(TableDefinition<&str, &[u8]>, fn(&str) -> Option<u64>); 3] = [
                (PROBE_SAMPLES, sample_key_timestamp),
                (PERFORMANCE_SAMPLES, sample_key_timestamp),
                (HEALING_LOG, healing_key_timestamp),
            ];
            for (table_def, timestamp_of) in tables {
                let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
                let mut expired = Vec::new();
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (key, _) = entry.map_err(map_err!(Read))?;
                    let key = key.value();
                    if timestamp_of(key).is_some_and(|ts| ts < cutoff) {
                        expired.push(key.to_string());
                    }
                }
                for key in &expired {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                }
                removed += expired.len() as u64;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(removed, cutoff, "history pruned");
        Ok(removed)
    }
}

fn latency_stats(values: impl Iterator<Item = f64>) -> LatencyStats {
    let mut stats = LatencyStats::default();
    let mut sum = 0.0;
    for v in values {
        stats.count += 1;
        sum += v;
        stats.min_ms = Some(stats.min_ms.map_or(v, |m| m.min(v)));
        stats.max_ms = Some(stats.max_ms.map_or(v, |m| m.max(v)));
    }
    if stats.count > 0 {
        stats.avg_ms = Some(sum / stats.count as f64);
    }
    stats
}
