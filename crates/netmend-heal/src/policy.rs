//! Healing policy and per-device healing state.

use serde::{Deserialize, Serialize};

use netmend_core::NetmendConfig;
use netmend_state::DeviceEntry;

/// Where a device stands in the healing state machine.
///
/// ```text
/// Healthy ─fail─► Degraded ─≥threshold─► HealingEligible ─► HealingInProgress
///    ▲                ▲                                         │
///    │                └──── attempt finished (re-armed by the ──┤
///    │                      next failed probe)                  │
///    └──────── observed online ◄──── Exhausted ◄── attempts ≥ max
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingState {
    Healthy,
    Degraded,
    HealingEligible,
    HealingInProgress,
    Exhausted,
}

impl HealingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealingState::Healthy => "healthy",
            HealingState::Degraded => "degraded",
            HealingState::HealingEligible => "healing_eligible",
            HealingState::HealingInProgress => "healing_in_progress",
            HealingState::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealingPolicy {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub max_attempts: u32,
}

impl HealingPolicy {
    pub fn from_config(config: &NetmendConfig) -> Self {
        Self {
            enabled: config.healing.enabled,
            failure_threshold: config.monitoring.failure_threshold,
            max_attempts: config.healing.max_attempts,
        }
    }

    /// Failures at or past the threshold, attempts below the cap, healing
    /// enabled, and no attempt waiting for its follow-up probe.
    pub fn should_trigger(&self, entry: &DeviceEntry) -> bool {
        self.enabled
            && entry.status.consecutive_failures >= self.failure_threshold
            && entry.healing.attempts < self.max_attempts
            && !entry.healing.awaiting_probe
            && !entry.healing.in_progress
    }

    pub fn classify(&self, entry: &DeviceEntry) -> HealingState {
        let status = &entry.status;
        let healing = &entry.healing;
        if healing.in_progress {
            HealingState::HealingInProgress
        } else if healing.attempts >= self.max_attempts && !status.online {
            HealingState::Exhausted
        } else if status.consecutive_failures == 0 {
            HealingState::Healthy
        } else if healing.awaiting_probe || status.consecutive_failures < self.failure_threshold {
            HealingState::Degraded
        } else {
            HealingState::HealingEligible
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmend_state::{DeviceStatus, HealingRecord};

    fn policy() -> HealingPolicy {
        HealingPolicy {
            enabled: true,
            failure_threshold: 3,
            max_attempts: 2,
        }
    }

    fn entry(failures: u32, attempts: u32) -> DeviceEntry {
        let mut status = DeviceStatus::new("10.0.0.1", "dev", "lab");
        status.consecutive_failures = failures;
        status.last_checked = Some(1);
        DeviceEntry {
            status,
            healing: HealingRecord {
                attempts,
                ..HealingRecord::default()
            },
        }
    }

    #[test]
    fn triggers_exactly_at_threshold() {
        let p = policy();
        assert!(!p.should_trigger(&entry(2, 0)));
        assert!(p.should_trigger(&entry(3, 0)));
        assert!(p.should_trigger(&entry(7, 1)));
        assert_eq!(p.classify(&entry(2, 0)), HealingState::Degraded);
        assert_eq!(p.classify(&entry(3, 0)), HealingState::HealingEligible);
    }

    #[test]
    fn cap_blocks_trigger() {
        let p = policy();
        assert!(!p.should_trigger(&entry(5, 2)));
        assert_eq!(p.classify(&entry(5, 2)), HealingState::Exhausted);
    }

    #[test]
    fn disabled_never_triggers() {
        let p = HealingPolicy {
            enabled: false,
            ..policy()
        };
        assert!(!p.should_trigger(&entry(10, 0)));
    }

    #[test]
    fn pending_attempt_is_degraded_until_rearmed() {
        let p = policy();
        let mut e = entry(3, 1);
        e.healing.awaiting_probe = true;
        assert!(!p.should_trigger(&e));
        assert_eq!(p.classify(&e), HealingState::Degraded);

        e.healing.in_progress = true;
        assert_eq!(p.classify(&e), HealingState::HealingInProgress);
    }

    #[test]
    fn zero_failures_is_healthy() {
        let mut e = entry(0, 0);
        e.status.online = true;
        assert_eq!(policy().classify(&e), HealingState::Healthy);
    }
}
