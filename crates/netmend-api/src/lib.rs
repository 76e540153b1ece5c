//! netmend-api: read-only HTTP view of the monitoring engine.
//!
//! Serves store snapshots, the healing log and history aggregates as
//! JSON, plus a Prometheus scrape endpoint.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/devices` | Every device status, configuration order |
//! | GET | `/api/v1/devices/{ip}` | One device with its healing record |
//! | GET | `/api/v1/devices/{ip}/history` | Uptime, latency and samples within `?window=` |
//! | GET | `/api/v1/labs/{lab}/summary` | Per-device uptime for a lab |
//! | GET | `/api/v1/healing` | Healing log, newest first |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
pub mod prometheus;

use axum::Router;
use axum::routing::get;

use netmend_heal::HealingPolicy;
use netmend_state::{DeviceStateStore, HealingLog, HistoryStore};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: DeviceStateStore,
    pub log: HealingLog,
    /// History endpoints answer 503 without it.
    pub history: Option<HistoryStore>,
    pub policy: HealingPolicy,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/devices", get(handlers::list_devices))
        .route("/devices/{ip}", get(handlers::get_device))
        .route("/devices/{ip}/history", get(handlers::device_history))
        .route("/labs/{lab}/summary", get(handlers::lab_summary))
        .route("/healing", get(handlers::healing_log))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        build_router(ApiState {
            store: DeviceStateStore::new(),
            log: HealingLog::default(),
            history: None,
            policy: HealingPolicy {
                enabled: true,
                failure_threshold: 3,
                max_attempts: 3,
            },
        })
    }

    #[tokio::test]
    async fn routes_are_mounted() {
        for (uri, status) in [
            ("/api/v1/devices", StatusCode::OK),
            ("/api/v1/devices/10.0.0.1", StatusCode::NOT_FOUND),
            ("/api/v1/devices/10.0.0.1/history", StatusCode::SERVICE_UNAVAILABLE),
            ("/api/v1/labs/lab_1/summary?window=7d", StatusCode::SERVICE_UNAVAILABLE),
            ("/api/v1/healing?limit=5", StatusCode::OK),
            ("/metrics", StatusCode::OK),
        ] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = router().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), status, "{uri}");
        }
    }
}
