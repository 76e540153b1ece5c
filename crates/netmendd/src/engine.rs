//! Wiring of store, history, prober, healer and monitor.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use netmend_api::ApiState;
use netmend_core::NetmendConfig;
use netmend_heal::{Healer, HealingPolicy, RemediationExecutor, RemediationSettings};
use netmend_monitor::{ConfigSource, Monitor, MonitorSettings};
use netmend_probe::{ProbeSettings, Prober};
use netmend_remote::SessionConnector;
use netmend_state::{DeviceStateStore, HealingLog, HistoryStore};

/// Every long-lived component of a running engine.
pub struct Engine {
    /// Configuration the engine was built from. Devices are re-read from
    /// the source every cycle; global settings are fixed at startup.
    pub config: NetmendConfig,
    pub store: DeviceStateStore,
    pub log: HealingLog,
    pub history: Option<HistoryStore>,
    pub healer: Arc<Healer>,
    pub monitor: Arc<Monitor>,
}

impl Engine {
    pub fn build(
        source: Arc<dyn ConfigSource>,
        config: NetmendConfig,
        connector: Arc<dyn SessionConnector>,
    ) -> anyhow::Result<Self> {
        let store = DeviceStateStore::new();
        let log = HealingLog::default();

        let history = match &config.storage.path {
            Some(path) => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir)
                        .with_context(|| format!("creating {}", dir.display()))?;
                }
                let history = HistoryStore::open(path)
                    .with_context(|| format!("opening history at {}", path.display()))?;
                info!(path = ?path, "history store opened");
                Some(history)
            }
            None => None,
        };

        let executor =
            RemediationExecutor::new(connector.clone(), RemediationSettings::from_config(&config));
        let mut healer = Healer::new(
            HealingPolicy::from_config(&config),
            store.clone(),
            log.clone(),
            executor,
        );
        if let Some(history) = &history {
            healer = healer.with_history(history.clone());
        }
        let healer = Arc::new(healer);

        let prober = Prober::new(ProbeSettings::from_config(&config), connector)?;
        let mut monitor = Monitor::new(
            source,
            store.clone(),
            prober,
            healer.clone(),
            MonitorSettings::from_config(&config),
        );
        if let Some(history) = &history {
            monitor = monitor.with_history(history.clone());
        }

        Ok(Self {
            config,
            store,
            log,
            history,
            healer,
            monitor: Arc::new(monitor),
        })
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            store: self.store.clone(),
            log: self.log.clone(),
            history: self.history.clone(),
            policy: self.healer.policy(),
        }
    }
}
