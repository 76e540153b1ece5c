//! Prober: runs a device's enabled probes in their fixed order.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use netmend_core::{Device, NetmendConfig, ProbeKind};
use netmend_remote::{SessionConnector, SessionTarget};
use netmend_state::{ProbeDetail, ProbeResult};

use crate::error::ProbeSetupError;
use crate::{dns, http, performance, port, reachability};

/// Timeouts applied to individual probes.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub ping_timeout: Duration,
    pub http_timeout: Duration,
    pub port_timeout: Duration,
    pub dns_timeout: Duration,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl ProbeSettings {
    pub fn from_config(config: &NetmendConfig) -> Self {
        Self {
            ping_timeout: config.monitoring.ping_timeout,
            http_timeout: config.monitoring.http_timeout,
            port_timeout: config.monitoring.port_timeout,
            dns_timeout: config.monitoring.dns_timeout,
            connect_timeout: config.healing.connect_timeout,
            command_timeout: config.healing.command_timeout,
        }
    }
}

pub struct Prober {
    client: Client,
    connector: Arc<dyn SessionConnector>,
    settings: ProbeSettings,
}

impl Prober {
    pub fn new(
        settings: ProbeSettings,
        connector: Arc<dyn SessionConnector>,
    ) -> Result<Self, ProbeSetupError> {
        Ok(Self {
            client: http::build_client()?,
            connector,
            settings,
        })
    }

    /// Run every enabled probe of `device`, one result per probe, in the
    /// order given by [`Device::enabled_probes`]. A `cached_performance`
    /// result is reported instead of taking a fresh performance sample.
    pub async fn run_all(
        &self,
        device: &Device,
        cached_performance: Option<ProbeResult>,
    ) -> Vec<ProbeResult> {
        let checks = &device.health_checks;
        let mut results = Vec::with_capacity(device.enabled_probes().len());

        if checks.ping {
            results.push(reachability::probe(&device.ip, self.settings.ping_timeout).await);
        }
        if let Some(check) = &checks.http {
            results.push(http::probe(&self.client, check, self.settings.http_timeout).await);
        }
        for &p in &checks.ports {
            results.push(port::probe(&device.ip, p, self.settings.port_timeout).await);
        }
        if let Some(check) = &checks.dns {
            let server = dns::server_for(device, check);
            results.push(dns::probe(check, server, self.settings.dns_timeout).await);
        }
        if checks.performance {
            let result = match cached_performance {
                Some(cached) => cached,
                None => self.sample_performance(device).await,
            };
            results.push(result);
        }
        results
    }

    /// Take a performance sample: over SSH when credentials exist, in-process
    /// for the monitor host, otherwise unavailable.
    pub async fn sample_performance(&self, device: &Device) -> ProbeResult {
        if let Some(target) = SessionTarget::for_device(device) {
            return performance::sample_remote(
                self.connector.as_ref(),
                &target,
                self.settings.connect_timeout,
                self.settings.command_timeout,
            )
            .await;
        }
        if device.is_local() {
            return performance::sample_local().await;
        }
        ProbeResult::unavailable(ProbeDetail::Performance { sample: None })
    }
}

/// Online iff the device's primary probe succeeded. Secondary probes never
/// count.
pub fn primary_online(device: &Device, results: &[ProbeResult]) -> bool {
    let Some(primary) = device.primary_probe() else {
        return false;
    };
    results
        .iter()
        .find(|r| r.kind() == primary)
        .is_some_and(ProbeResult::is_success)
}
