// =============================================================================
// Autonomous Options Trader — Main Entry Point
// =============================================================================
//
// Starts disabled (spec §6.1 `enabled` defaults to `false`). An operator
// flips it on via `POST /api/v1/control/enable` once the Store, market-data,
// and AI gateway endpoints are configured.
// =============================================================================

mod ai_gateway;
mod api;
mod clock;
mod config;
mod control_surface;
mod decisions;
mod error;
mod events;
mod market_data;
mod monitor;
mod parsers;
mod pipeline;
mod prompts;
mod risk;
mod scheduler;
mod sector_map;
mod store;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::ai_gateway::AiGateway;
use crate::clock::SystemClock;
use crate::control_surface::ControlSurface;
use crate::decisions::DecisionLog;
use crate::events::EventBus;
use crate::market_data::MarketDataGateway;
use crate::pipeline::PipelineContext;
use crate::scheduler::ScheduleTimes;
use crate::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("autonomous-options-trader starting up");

    let db_path = std::env::var("TRADER_DB_PATH").unwrap_or_else(|_| "trader.db".to_string());
    let store = Store::open(&db_path).await?;
    info!(path = %db_path, "store opened");

    let market_data_url =
        std::env::var("MARKET_DATA_URL").unwrap_or_else(|_| "http://localhost:8090".to_string());
    let ai_gateway_url = std::env::var("AI_GATEWAY_URL").unwrap_or_else(|_| "http://localhost:8091".to_string());
    let ai_timeout_secs: u64 = std::env::var("AI_GATEWAY_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(120);

    let ctx = PipelineContext {
        store: store.clone(),
        market_data: MarketDataGateway::new(market_data_url),
        ai: AiGateway::new(ai_gateway_url, Duration::from_secs(ai_timeout_secs)),
        events: EventBus::default(),
        clock: Arc::new(SystemClock),
        decisions: DecisionLog::new(),
    };

    let config_str = |key: &'static str, default: &'static str| {
        let store = store.clone();
        async move { store.get_config(key).await.ok().flatten().unwrap_or_else(|| default.to_string()) }
    };

    let times = ScheduleTimes::with_overrides(
        &config_str("morning_scan_time", "06:00").await,
        &config_str("analysis_time", "07:00").await,
        &config_str("execution_time", "09:31").await,
        &config_str("eod_review_time", "16:01").await,
        &config_str("reflection_time", "16:30").await,
        config_str("monitor_interval_sec", "30").await.parse().unwrap_or(30),
    );

    let control = Arc::new(ControlSurface::new(ctx, times));

    if store.get_config("enabled").await?.as_deref() == Some("true") {
        info!("enabled=true in the store, starting the scheduler");
        if let Err(e) = control.start().await {
            warn!(error = %e, "failed to start scheduler on boot");
        }
    } else {
        info!("trader is disabled; waiting for POST /api/v1/control/enable");
    }

    let api_control = control.clone();
    let bind_addr = std::env::var("TRADER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let bind_addr_clone = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_control);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    let status_control = control.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            if let Err(e) = status_control.broadcast_status().await {
                warn!(error = %e, "failed to broadcast status");
            }
        }
    });

    info!("all subsystems running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");
    control.stop().await;
    store.close().await;

    info!("autonomous-options-trader shut down complete");
    Ok(())
}
