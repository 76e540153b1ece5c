//! REST API handlers.
//!
//! Every handler reads a snapshot of the device store, the healing log or
//! the history database and returns JSON. Nothing here mutates state.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use netmend_core::DeviceId;
use netmend_core::duration::{format_duration, parse_duration};
use netmend_heal::HealingState;
use netmend_state::*;

use crate::ApiState;

const DEFAULT_WINDOW: Duration = Duration::from_secs(24 * 3600);
const DEFAULT_HISTORY_SAMPLES: usize = 100;
const DEFAULT_LOG_LIMIT: usize = 50;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// A device entry as served to readers, with its classified healing state.
#[derive(Debug, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub status: DeviceStatus,
    pub healing: HealingRecord,
    pub healing_state: HealingState,
}

impl DeviceView {
    fn new(entry: DeviceEntry, state: &ApiState) -> Self {
        let healing_state = state.policy.classify(&entry);
        Self {
            status: entry.status,
            healing: entry.healing,
            healing_state,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    /// Look-back window such as `1h` or `7d`.
    pub window: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeviceHistory {
    pub ip: DeviceId,
    pub window: String,
    pub uptime_percent: Option<f64>,
    pub latency: LatencyStats,
    pub samples: Vec<ProbeSample>,
    pub performance: Vec<PerformanceRecord>,
}

#[derive(Debug, Serialize)]
pub struct LabSummary {
    pub lab_id: String,
    pub window: String,
    pub devices: Vec<DeviceUptime>,
}

/// Epoch cutoff and canonical label of a `?window=` parameter.
fn window_start(raw: Option<&str>) -> Option<(u64, String)> {
    let window = match raw {
        Some(raw) => parse_duration(raw).filter(|d| !d.is_zero())?,
        None => DEFAULT_WINDOW,
    };
    Some((
        epoch_secs().saturating_sub(window.as_secs()),
        format_duration(window),
    ))
}

// ── Devices ────────────────────────────────────────────────────

/// GET /api/v1/devices
pub async fn list_devices(State(state): State<ApiState>) -> impl IntoResponse {
    let views: Vec<DeviceView> = state
        .store
        .snapshot()
        .into_iter()
        .map(|entry| DeviceView::new(entry, &state))
        .collect();
    ApiResponse::ok(views)
}

/// GET /api/v1/devices/{ip}
pub async fn get_device(
    State(state): State<ApiState>,
    Path(ip): Path<String>,
) -> impl IntoResponse {
    match state.store.get(&ip) {
        Some(entry) => ApiResponse::ok(DeviceView::new(entry, &state)).into_response(),
        None => error_response("device not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// GET /api/v1/devices/{ip}/history
pub async fn device_history(
    State(state): State<ApiState>,
    Path(ip): Path<String>,
    Query(query): Query<WindowQuery>,
) -> impl IntoResponse {
    let Some(history) = &state.history else {
        return error_response("history storage not configured", StatusCode::SERVICE_UNAVAILABLE)
            .into_response();
    };
    if !state.store.contains(&ip) {
        return error_response("device not found", StatusCode::NOT_FOUND).into_response();
    }
    let Some((since, window)) = window_start(query.window.as_deref()) else {
        return error_response("invalid window", StatusCode::BAD_REQUEST).into_response();
    };
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_SAMPLES);

    match load_history(history, &ip, since, window, limit) {
        Ok(body) => ApiResponse::ok(body).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

fn load_history(
    history: &HistoryStore,
    ip: &str,
    since: u64,
    window: String,
    limit: usize,
) -> StateResult<DeviceHistory> {
    Ok(DeviceHistory {
        ip: ip.to_string(),
        window,
        uptime_percent: history.uptime_percent(ip, since)?,
        latency: history.latency_stats(ip, since)?,
        samples: history.list_probe_samples(ip, since, limit)?,
        performance: history.list_performance(ip, since, limit)?,
    })
}

// ── Labs ───────────────────────────────────────────────────────

/// GET /api/v1/labs/{lab}/summary
pub async fn lab_summary(
    State(state): State<ApiState>,
    Path(lab_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> impl IntoResponse {
    let Some(history) = &state.history else {
        return error_response("history storage not configured", StatusCode::SERVICE_UNAVAILABLE)
            .into_response();
    };
    let Some((since, window)) = window_start(query.window.as_deref()) else {
        return error_response("invalid window", StatusCode::BAD_REQUEST).into_response();
    };
    match history.lab_summary(&lab_id, since) {
        Ok(devices) => ApiResponse::ok(LabSummary {
            lab_id,
            window,
            devices,
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Healing log ────────────────────────────────────────────────

/// GET /api/v1/healing
pub async fn healing_log(
    State(state): State<ApiState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(DEFAULT_LOG_CAPACITY);
    ApiResponse::ok(state.log.recent(limit))
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = crate::prometheus::render_prometheus(&state.store.snapshot(), &state.policy);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
