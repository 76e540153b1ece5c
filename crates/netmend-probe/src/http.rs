//! HTTP(S) status probe.

use std::error::Error as _;
use std::io;
use std::time::{Duration, Instant};

use reqwest::Client;
use reqwest::redirect::Policy;
use tracing::debug;

use netmend_core::HttpCheck;
use netmend_state::{ProbeDetail, ProbeError, ProbeResult, ProbeStatus};

use crate::error::classify_io;

/// Shared client: redirects followed, self-signed certificates accepted.
pub fn build_client() -> reqwest::Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .redirect(Policy::limited(10))
        .user_agent(concat!("netmend/", env!("CARGO_PKG_VERSION")))
        .build()
}

fn classify(e: &reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        return ProbeError::Timeout;
    }
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return classify_io(io_err);
        }
        source = err.source();
    }
    if e.is_connect() {
        ProbeError::Unreachable(e.to_string())
    } else {
        ProbeError::Other(e.to_string())
    }
}

/// GET the configured URL. Success iff the final status equals the
/// expected status.
pub async fn probe(client: &Client, check: &HttpCheck, timeout: Duration) -> ProbeResult {
    let detail = |status_code: Option<u16>| ProbeDetail::Http {
        url: check.url.clone(),
        expected_status: check.expected_status,
        status_code,
    };

    let start = Instant::now();
    match client.get(&check.url).timeout(timeout).send().await {
        Ok(resp) => {
            let code = resp.status().as_u16();
            let latency = start.elapsed().as_secs_f64() * 1000.0;
            if code == check.expected_status {
                ProbeResult::success(detail(Some(code)), Some(latency))
            } else {
                debug!(url = %check.url, code, expected = check.expected_status, "unexpected status");
                ProbeResult {
                    status: ProbeStatus::Failure,
                    latency_ms: Some(latency),
                    error: Some(ProbeError::StatusMismatch {
                        expected: check.expected_status,
                        actual: code,
                    }),
                    detail: detail(Some(code)),
                }
            }
        }
        Err(e) => {
            debug!(url = %check.url, error = %e, "http probe failed");
            ProbeResult::failure(detail(None), classify(&e))
        }
    }
}
