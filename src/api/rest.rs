// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. Every other endpoint requires a valid Bearer token checked
// via the `AuthBearer` extractor. These surface the Control Surface (C11)
// operations and read-only Store views over HTTP.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::control_surface::ControlSurface;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(control: Arc<ControlSurface>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/status", get(status_snapshot))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/scan", get(latest_scan))
        .route("/api/v1/performance", get(performance))
        .route("/api/v1/equity-curve", get(equity_curve))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/trade-journal", get(trade_journal))
        .route("/api/v1/config", get(get_config))
        .route("/api/v1/config", post(set_config))
        .route("/api/v1/control/enable", post(control_enable))
        .route("/api/v1/control/disable", post(control_disable))
        .route("/api/v1/control/run-phase/:phase", post(control_run_phase))
        .route("/api/v1/control/manual-close/:trade_id", post(control_manual_close))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(control)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Status snapshot (authenticated) — spec §4.11 getStatus
// =============================================================================

async fn status_snapshot(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
) -> impl IntoResponse {
    match control.get_status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

// =============================================================================
// Positions (authenticated)
// =============================================================================

async fn positions(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
) -> impl IntoResponse {
    match control.store().get_open_trades().await {
        Ok(trades) => Json(trades).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

// =============================================================================
// Latest market scan (authenticated)
// =============================================================================

async fn latest_scan(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
) -> impl IntoResponse {
    match control.store().get_latest_market_scan().await {
        Ok(scan) => Json(scan).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

// =============================================================================
// Performance metrics (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct PerformanceQuery {
    #[serde(default = "default_window_days")]
    days: i64,
}

fn default_window_days() -> i64 {
    30
}

async fn performance(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
    axum::extract::Query(query): axum::extract::Query<PerformanceQuery>,
) -> impl IntoResponse {
    match control.store().get_performance_metrics(query.days).await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

// =============================================================================
// Equity curve (authenticated)
// =============================================================================

async fn equity_curve(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
) -> impl IntoResponse {
    match control.store().get_equity_curve().await {
        Ok(curve) => Json(curve).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

// =============================================================================
// Decision audit trail (authenticated)
// =============================================================================

async fn decisions(_auth: AuthBearer, State(control): State<Arc<ControlSurface>>) -> impl IntoResponse {
    Json(control.decisions().recent()).into_response()
}

// =============================================================================
// Trade journal (authenticated)
// =============================================================================

async fn trade_journal(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
) -> impl IntoResponse {
    match control.store().get_closed_trades(500).await {
        Ok(trades) => Json(trades).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

// =============================================================================
// Config (authenticated)
// =============================================================================

async fn get_config(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
) -> impl IntoResponse {
    match control.store().get_all_config().await {
        Ok(config) => Json(config).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

#[derive(Deserialize)]
struct ConfigUpdate {
    key: String,
    value: String,
}

async fn set_config(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
    Json(update): Json<ConfigUpdate>,
) -> impl IntoResponse {
    match control.store().set_config(&update.key, &update.value).await {
        Ok(()) => {
            info!(key = %update.key, value = %update.value, "config key updated via API");
            Json(serde_json::json!({ "key": update.key, "value": update.value })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

// =============================================================================
// Control endpoints (authenticated) — spec §4.11
// =============================================================================

async fn control_enable(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
) -> impl IntoResponse {
    match control.enable().await {
        Ok(()) => {
            info!("trader ENABLED via API");
            Json(serde_json::json!({ "enabled": true })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn control_disable(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
) -> impl IntoResponse {
    match control.disable().await {
        Ok(()) => {
            warn!("trader DISABLED via API");
            Json(serde_json::json!({ "enabled": false })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn control_run_phase(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
    Path(phase): Path<u8>,
) -> impl IntoResponse {
    if !(1..=5).contains(&phase) {
        return error_response(StatusCode::BAD_REQUEST, "phase must be between 1 and 5");
    }
    match control.run_phase(phase).await {
        Ok(outcome) => Json(serde_json::json!({ "phase": phase, "outcome": outcome })).into_response(),
        Err(e) => error_response(StatusCode::CONFLICT, &e.to_string()),
    }
}

#[derive(Deserialize, Default)]
struct ManualCloseRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn control_manual_close(
    _auth: AuthBearer,
    State(control): State<Arc<ControlSurface>>,
    Path(trade_id): Path<i64>,
    body: Option<Json<ManualCloseRequest>>,
) -> impl IntoResponse {
    let reason = body.map(|Json(r)| r).unwrap_or_default().reason;
    match control.manual_close(trade_id, reason).await {
        Ok(()) => {
            info!(trade_id, "trade manually closed via API");
            Json(serde_json::json!({ "trade_id": trade_id, "closed": true })).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
