//! DNS resolution probe.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use tracing::debug;

use netmend_core::{Device, DnsCheck, is_local_host};
use netmend_state::{ProbeDetail, ProbeError, ProbeResult};

pub const DEFAULT_DNS_SERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

/// Resolver to query for a device: the configured server, the device itself
/// when it is a DNS server, otherwise a public resolver.
pub fn server_for(device: &Device, check: &DnsCheck) -> IpAddr {
    if let Some(server) = check.server {
        return server;
    }
    if device.is_dns_server() {
        if is_local_host(&device.ip) {
            return IpAddr::V4(Ipv4Addr::LOCALHOST);
        }
        if let Ok(ip) = device.ip.parse() {
            return ip;
        }
    }
    DEFAULT_DNS_SERVER
}

/// Resolve the A record of `check.domain` through `server`.
pub async fn probe(check: &DnsCheck, server: IpAddr, timeout: Duration) -> ProbeResult {
    let detail = |resolved: Vec<String>| ProbeDetail::Dns {
        domain: check.domain.clone(),
        server: server.to_string(),
        resolved,
    };

    let group = NameServerConfigGroup::from_ips_clear(&[server], 53, true);
    let config = ResolverConfig::from_parts(None, Vec::new(), group);
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;
    opts.cache_size = 0;
    let resolver = TokioAsyncResolver::tokio(config, opts);

    let start = Instant::now();
    let lookup = tokio::time::timeout(
        timeout + Duration::from_millis(500),
        resolver.ipv4_lookup(check.domain.as_str()),
    )
    .await;

    match lookup {
        Ok(Ok(answer)) => {
            let latency = start.elapsed().as_secs_f64() * 1000.0;
            let resolved: Vec<String> = answer.iter().map(|a| a.to_string()).collect();
            ProbeResult::success(detail(resolved), Some(latency))
        }
        Ok(Err(e)) => {
            debug!(domain = %check.domain, %server, error = %e, "dns lookup failed");
            let error = match e.kind() {
                ResolveErrorKind::Timeout => ProbeError::Timeout,
                _ => ProbeError::Resolution(e.to_string()),
            };
            ProbeResult::failure(detail(Vec::new()), error)
        }
        Err(_) => ProbeResult::failure(detail(Vec::new()), ProbeError::Timeout),
    }
}
