//! DeviceStateStore: the in-process source of truth for device health.
//!
//! The monitor is the only writer. API handlers and other readers take
//! [`DeviceStateStore::snapshot`] copies and never hold the lock across an
//! await point.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use netmend_core::{Device, DeviceId};

use crate::error::{StateError, StateResult};
use crate::types::*;

#[derive(Default)]
struct Inner {
    /// Identities in the order they were first merged.
    order: Vec<DeviceId>,
    entries: HashMap<DeviceId, DeviceEntry>,
}

impl Inner {
    fn entry_mut(&mut self, ip: &str) -> StateResult<&mut DeviceEntry> {
        self.entries
            .get_mut(ip)
            .ok_or_else(|| StateError::UnknownDevice(ip.to_string()))
    }
}

/// Concurrency-safe map from device identity to status and healing record.
#[derive(Clone, Default)]
pub struct DeviceStateStore {
    inner: Arc<RwLock<Inner>>,
}

impl DeviceStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add entries for identities not seen before. Existing entries are left
    /// untouched so a configuration reload never clears live counters.
    /// Returns the identities that were added.
    pub fn merge(&self, devices: &[Device]) -> Vec<DeviceId> {
        let mut inner = self.inner.write();
        let mut added = Vec::new();
        for device in devices {
            if inner.entries.contains_key(&device.ip) {
                continue;
            }
            inner.entries.insert(
                device.ip.clone(),
                DeviceEntry {
                    status: DeviceStatus::new(&device.ip, &device.label, &device.lab_id),
                    healing: HealingRecord::default(),
                },
            );
            inner.order.push(device.ip.clone());
            added.push(device.ip.clone());
        }
        if !added.is_empty() {
            debug!(count = added.len(), "devices merged into state store");
        }
        added
    }

    /// Record the outcome of a probe round.
    ///
    /// Sets the online flag, refreshes `last_seen` when online, and resets or
    /// increments the failure counter. On an offline→online transition the
    /// healing attempt counter is cleared in the same locked update.
    pub fn update(
        &self,
        ip: &str,
        online: bool,
        results: Vec<ProbeResult>,
    ) -> StateResult<StatusUpdate> {
        let now = epoch_secs();
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(ip)?;
        let status = &mut entry.status;

        let previous_online = status.last_checked.map(|_| status.online);
        status.online = online;
        status.last_checked = Some(now);
        status.results = results;

        let mut recovered = None;
        if online {
            status.last_seen = Some(now);
            status.consecutive_failures = 0;
            if previous_online == Some(false) {
                recovered = Some(entry.healing.attempts);
                entry.healing.attempts = 0;
                entry.healing.awaiting_probe = false;
            }
        } else {
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            entry.healing.awaiting_probe = false;
        }

        Ok(StatusUpdate {
            ip: ip.to_string(),
            previous_online,
            online,
            consecutive_failures: entry.status.consecutive_failures,
            recovered,
        })
    }

    /// Copy of every entry, in merge order.
    pub fn snapshot(&self) -> Vec<DeviceEntry> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|ip| inner.entries.get(ip).cloned())
            .collect()
    }

    pub fn get(&self, ip: &str) -> Option<DeviceEntry> {
        self.inner.read().entries.get(ip).cloned()
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.inner.read().entries.contains_key(ip)
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Healing bookkeeping ────────────────────────────────────────

    /// Check the cap and, if there is room, count a new attempt.
    pub fn begin_healing(&self, ip: &str, max_attempts: u32) -> StateResult<AttemptGate> {
        let mut inner = self.inner.write();
        let healing = &mut inner.entry_mut(ip)?.healing;

        if healing.in_progress {
            return Ok(AttemptGate::InProgress);
        }
        if healing.attempts >= max_attempts {
            healing.last_outcome = Some(HealingOutcome::Exhausted);
            return Ok(AttemptGate::Exhausted {
                attempts: healing.attempts,
            });
        }

        healing.attempts += 1;
        healing.in_progress = true;
        healing.awaiting_probe = true;
        healing.last_attempt_at = Some(epoch_secs());
        Ok(AttemptGate::Granted {
            attempt: healing.attempts,
        })
    }

    /// Close the attempt opened by [`begin_healing`](Self::begin_healing).
    /// A successful attempt also clears the failure counter.
    pub fn finish_healing(&self, ip: &str, outcome: HealingOutcome) -> StateResult<()> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(ip)?;
        entry.healing.in_progress = false;
        entry.healing.last_outcome = Some(outcome);
        if outcome == HealingOutcome::Success {
            entry.status.consecutive_failures = 0;
        }
        Ok(())
    }

    /// Close attempts that will never finish, after a cycle was abandoned
    /// mid-remediation. Returns how many were open.
    pub fn abandon_open_attempts(&self) -> usize {
        let mut inner = self.inner.write();
        let mut abandoned = 0;
        for entry in inner.entries.values_mut() {
            if entry.healing.in_progress {
                entry.healing.in_progress = false;
                entry.healing.last_outcome = Some(HealingOutcome::Failure);
                abandoned += 1;
            }
        }
        abandoned
    }

    /// Zero the attempt counter. Returns the value that was cleared.
    pub fn reset_healing(&self, ip: &str) -> StateResult<u32> {
        let mut inner = self.inner.write();
        let healing = &mut inner.entry_mut(ip)?.healing;
        let previous = healing.attempts;
        healing.attempts = 0;
        healing.last_outcome = None;
        healing.awaiting_probe = false;
        Ok(previous)
    }
}
