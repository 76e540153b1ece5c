//! TCP connect probe.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::debug;

use netmend_state::{ProbeDetail, ProbeError, ProbeResult};

use crate::error::classify_io;

pub async fn probe(host: &str, port: u16, timeout: Duration) -> ProbeResult {
    let detail = ProbeDetail::Port { port };
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => {
            let latency = start.elapsed().as_secs_f64() * 1000.0;
            ProbeResult::success(detail, Some(latency))
        }
        Ok(Err(e)) => {
            debug!(%host, port, error = %e, "port closed");
            ProbeResult::failure(detail, classify_io(&e))
        }
        Err(_) => ProbeResult::failure(detail, ProbeError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmend_state::ProbeStatus;

    #[tokio::test]
    async fn open_port_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let result = probe("127.0.0.1", port, Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Success);
        assert_eq!(result.detail, ProbeDetail::Port { port });
    }

    #[tokio::test]
    async fn closed_port_is_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let result = probe("127.0.0.1", port, Duration::from_secs(1)).await;
        assert_eq!(result.status, ProbeStatus::Failure);
        assert_eq!(result.error, Some(ProbeError::ConnectionRefused));
    }
}
