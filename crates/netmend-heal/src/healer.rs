//! Healer: the per-device healing state machine.
//!
//! Counters live in the [`DeviceStateStore`]; the healer decides when to act,
//! gates attempts against the cap, drives the [`RemediationExecutor`], and
//! writes every decision to the healing log.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use netmend_core::{Device, DeviceId};
use netmend_remote::SessionTarget;
use netmend_state::*;

use crate::detect::OsFamily;
use crate::error::{HealingError, HealingResult};
use crate::executor::RemediationExecutor;
use crate::policy::{HealingPolicy, HealingState};

/// Method recorded for attempts that never reached a strategy.
const SSH_METHOD: &str = "SSH remediation";
const NO_METHOD: &str = "none";

/// Outcome of a successful attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealingReport {
    pub ip: DeviceId,
    pub attempt: u32,
    pub family: OsFamily,
    pub method: String,
    pub verified: Option<bool>,
    pub detail: String,
}

pub struct Healer {
    policy: HealingPolicy,
    store: DeviceStateStore,
    log: HealingLog,
    history: Option<HistoryStore>,
    executor: RemediationExecutor,
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl Healer {
    pub fn new(
        policy: HealingPolicy,
        store: DeviceStateStore,
        log: HealingLog,
        executor: RemediationExecutor,
    ) -> Self {
        Self {
            policy,
            store,
            log,
            history: None,
            executor,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Also persist log entries to `history`.
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn policy(&self) -> HealingPolicy {
        self.policy
    }

    /// Replace the device definitions used for credentials and labels.
    pub fn update_devices(&self, devices: &[Device]) {
        let mut map = self.devices.write();
        map.clear();
        map.extend(devices.iter().map(|d| (d.ip.clone(), d.clone())));
    }

    pub fn should_trigger_healing(&self, ip: &str) -> bool {
        self.store
            .get(ip)
            .is_some_and(|entry| self.policy.should_trigger(&entry))
    }

    pub fn state(&self, ip: &str) -> Option<HealingState> {
        self.store.get(ip).map(|entry| self.policy.classify(&entry))
    }

    /// Attempt remediation of one device.
    ///
    /// Refusals (disabled, unknown device, no credentials, cap reached)
    /// open no session. Only the cap refusal is logged. Every attempt that
    /// gets past the gate counts against the cap and is logged, whether it
    /// succeeds or not.
    pub async fn heal_device(&self, ip: &str) -> HealingResult<HealingReport> {
        if !self.policy.enabled {
            return Err(HealingError::Disabled);
        }
        let device = self
            .devices
            .read()
            .get(ip)
            .cloned()
            .ok_or(HealingError::DeviceNotFound)?;
        if !self.store.contains(ip) {
            return Err(HealingError::DeviceNotFound);
        }
        let target = SessionTarget::for_device(&device).ok_or(HealingError::NotConfigured)?;

        let attempt = match self.store.begin_healing(ip, self.policy.max_attempts)? {
            AttemptGate::Granted { attempt } => attempt,
            AttemptGate::InProgress => return Err(HealingError::InProgress),
            AttemptGate::Exhausted { attempts } => {
                warn!(%ip, attempts, max = self.policy.max_attempts, "healing refused, attempts exhausted");
                self.record(
                    &device,
                    attempts,
                    NO_METHOD,
                    LogOutcome::Exhausted,
                    format!("max attempts reached ({attempts}/{})", self.policy.max_attempts),
                );
                return Err(HealingError::MaxAttemptsReached);
            }
        };

        info!(%ip, attempt, max = self.policy.max_attempts, "starting remediation");
        match self.executor.remediate(&target).await {
            Ok(report) => {
                self.store.finish_healing(ip, HealingOutcome::Success)?;
                let detail = report.summary();
                info!(%ip, attempt, family = %report.family, verified = ?report.verified, "remediation completed");
                self.record(&device, attempt, &report.method, LogOutcome::Success, detail.clone());
                Ok(HealingReport {
                    ip: ip.to_string(),
                    attempt,
                    family: report.family,
                    method: report.method,
                    verified: report.verified,
                    detail,
                })
            }
            Err(e) => {
                self.store.finish_healing(ip, HealingOutcome::Failure)?;
                warn!(%ip, attempt, error = %e, "remediation failed");
                self.record(&device, attempt, SSH_METHOD, LogOutcome::Failed, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Zero the attempt counter and log a recovery. Returns the cleared count.
    pub fn reset_healing_history(&self, ip: &str) -> HealingResult<u32> {
        let cleared = self.store.reset_healing(ip)?;
        self.log_recovery(ip, cleared);
        Ok(cleared)
    }

    /// React to a status update. The store has already cleared the counters
    /// of a recovered device; this writes the matching log entry.
    pub fn observe(&self, update: &StatusUpdate) {
        if let Some(cleared) = update.recovered {
            info!(ip = %update.ip, cleared, "device recovered");
            self.log_recovery(&update.ip, cleared);
        }
    }

    fn log_recovery(&self, ip: &str, cleared: u32) {
        let detail = format!("device back online; cleared {cleared} healing attempt(s)");
        let device = self.devices.read().get(ip).cloned();
        match device {
            Some(device) => self.record(&device, cleared, NO_METHOD, LogOutcome::Recovered, detail),
            None => {
                let (label, lab_id) = self
                    .store
                    .get(ip)
                    .map(|e| (e.status.label, e.status.lab_id))
                    .unwrap_or_default();
                self.append(HealingLogEntry {
                    timestamp: epoch_secs(),
                    ip: ip.to_string(),
                    label,
                    lab_id,
                    attempt: cleared,
                    method: NO_METHOD.to_string(),
                    outcome: LogOutcome::Recovered,
                    detail,
                });
            }
        }
    }

    fn record(&self, device: &Device, attempt: u32, method: &str, outcome: LogOutcome, detail: String) {
        self.append(HealingLogEntry {
            timestamp: epoch_secs(),
            ip: device.ip.clone(),
            label: device.label.clone(),
            lab_id: device.lab_id.clone(),
            attempt,
            method: method.to_string(),
            outcome,
            detail,
        });
    }

    fn append(&self, entry: HealingLogEntry) {
        debug!(ip = %entry.ip, outcome = %entry.outcome, attempt = entry.attempt, "healing log entry");
        if let Some(history) = &self.history {
            if let Err(e) = history.append_healing(&entry) {
                warn!(ip = %entry.ip, error = %e, "failed to persist healing entry");
            }
        }
        self.log.append(entry);
    }
}
