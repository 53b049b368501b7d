//! HTTP control surface.
//!
//! The device router exposes live signal reads, history, the poll interval,
//! manual calls and the auto-dial switch. The aggregator router only accepts
//! readings published by devices and serves its own history. Handlers are thin:
//! anything that blocks on the modem or the store runs on the blocking pool.

use crate::modem::Modem;
use crate::modem::dial::validate_number;
use crate::schedule::config::{ConfigError, SchedulerConfig, check_manual_call};
use crate::store::{HistoryQuery, ReadingStore};
use crate::sync::{IngestOutcome, IngestPayload, ingest};
use anyhow::Context;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

const DEFAULT_CALL_SECS: u64 = 15;
const DEFAULT_AUTO_CALL_INTERVAL_SECS: u64 = 1_800;

pub struct DeviceState {
    pub modem: Arc<Modem>,
    pub config: Arc<SchedulerConfig>,
    pub store: Arc<dyn ReadingStore>,
}

pub fn device_router(state: Arc<DeviceState>) -> Router {
    Router::new()
        .route("/signal", get(signal_now))
        .route("/history", get(device_history))
        .route("/config", get(update_config))
        .route("/call", get(call_now))
        .route("/auto_call/start", get(start_auto_call))
        .route("/auto_call/stop", get(stop_auto_call))
        .route("/auto_call/status", get(auto_call_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn aggregator_router(store: Arc<dyn ReadingStore>) -> Router {
    Router::new()
        .route("/ingest", post(ingest_reading))
        .route("/history", get(aggregator_history))
        .layer(CorsLayer::permissive())
        .with_state(store)
}

// Serve until the shared run flag clears.
pub async fn serve(app: Router, addr: SocketAddr, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTP listener failed: {addr}"))?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_stop(running))
        .await
        .context("HTTP server failed")?;
    info!("HTTP server stopped");
    Ok(())
}

// Runtime shared by the HTTP side and the SQLite store, while the modem loops
// keep running on plain threads.
pub fn service_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building service runtime failed")
}

async fn wait_for_stop(running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        Self::bad_request(err.to_string())
    }
}

// Malformed query strings and bodies get the same JSON error shape as
// validation failures instead of axum's plain-text rejection.
impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "status": "error", "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::internal(format!("blocking task failed: {err}")))
}

// ── Device routes ───────────────────────────────────────────────────

async fn signal_now(State(state): State<Arc<DeviceState>>) -> Result<Json<Value>, ApiError> {
    let modem = Arc::clone(&state.modem);
    let report = blocking(move || modem.read_signal_once()).await?;
    Ok(Json(json!({
        "rssi": report.map(|r| r.rssi),
        "dbm": report.and_then(|r| r.dbm),
        "ber": report.map(|r| r.ber),
    })))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
    start: Option<i64>,
    end: Option<i64>,
}

async fn device_history(
    State(state): State<Arc<DeviceState>>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    load_history(Arc::clone(&state.store), params).await
}

async fn load_history(store: Arc<dyn ReadingStore>, params: HistoryParams) -> Result<Json<Value>, ApiError> {
    let query = HistoryQuery::new(params.limit, params.start, params.end);
    let data = blocking(move || store.query(&query))
        .await?
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(json!({ "data": data })))
}

#[derive(Debug, Deserialize)]
struct ConfigParams {
    interval: Option<f64>,
}

async fn update_config(
    State(state): State<Arc<DeviceState>>,
    params: Result<Query<ConfigParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    let interval = match params.interval {
        Some(secs) => {
            let secs = state.config.set_poll_interval(secs)?;
            info!(interval_secs = secs, "poll interval changed");
            secs
        }
        None => state.config.poll_interval_secs(),
    };
    Ok(Json(json!({ "status": "ok", "interval": interval })))
}

#[derive(Debug, Deserialize)]
struct CallParams {
    number: Option<String>,
    secs: Option<u64>,
}

async fn call_now(
    State(state): State<Arc<DeviceState>>,
    params: Result<Query<CallParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let number = params
        .number
        .unwrap_or_else(|| state.config.auto_dial_number().to_string());
    validate_number(&number)?;
    let hold = check_manual_call(params.secs.unwrap_or(DEFAULT_CALL_SECS))?;

    let modem = Arc::clone(&state.modem);
    let result = blocking(move || modem.dial(&number, hold)).await?;
    Ok(Json(result).into_response())
}

#[derive(Debug, Deserialize)]
struct AutoCallParams {
    interval: Option<u64>,
    secs: Option<u64>,
}

async fn start_auto_call(
    State(state): State<Arc<DeviceState>>,
    params: Result<Query<AutoCallParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    let status = state.config.start_auto_dial(
        params.interval.unwrap_or(DEFAULT_AUTO_CALL_INTERVAL_SECS),
        params.secs.unwrap_or(DEFAULT_CALL_SECS),
    )?;
    info!(
        interval_secs = status.interval,
        duration_secs = status.duration,
        "auto-dial enabled"
    );
    Ok(Json(json!({
        "status": "ok",
        "auto_call_enabled": status.enabled,
        "interval": status.interval,
        "duration": status.duration,
    })))
}

async fn stop_auto_call(State(state): State<Arc<DeviceState>>) -> Json<Value> {
    let status = state.config.stop_auto_dial();
    info!("auto-dial disabled");
    Json(json!({ "status": "ok", "auto_call_enabled": status.enabled }))
}

async fn auto_call_status(State(state): State<Arc<DeviceState>>) -> impl IntoResponse {
    Json(state.config.auto_dial_status())
}

// ── Aggregator routes ───────────────────────────────────────────────

async fn aggregator_history(
    State(store): State<Arc<dyn ReadingStore>>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    load_history(store, params).await
}

async fn ingest_reading(
    State(store): State<Arc<dyn ReadingStore>>,
    payload: Result<Json<IngestPayload>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let outcome = blocking(move || ingest(store.as_ref(), payload))
        .await?
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let response = match outcome {
        IngestOutcome::Stored(reading) => (
            StatusCode::CREATED,
            Json(json!({ "status": "ok", "timestamp": reading.timestamp })),
        ),
        IngestOutcome::Dropped => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "dropped",
                "message": "timestamp and rssi are required",
            })),
        ),
    };
    Ok(response.into_response())
}
