//! ArbScope Server
//!
//! JSON-over-HTTP adapter for the arbitrage analytics engine. Scans are
//! CPU-bound and run on the blocking pool; a watchdog sets the scan's
//! cancellation token when the configured timeout passes, and the engine
//! returns a structured "cancelled" outcome with no partial results.

mod engine;
mod models;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::engine::allocator::AllocationPlan;
use crate::engine::market_data::quick_scan_edges;
use crate::engine::pipeline::{allocate_from_cache, scan, stress_from_cache, EdgeInput, ScanOptions};
use crate::engine::stress::StressReport;
use crate::engine::{CancellationToken, EngineContext, EngineError};
use crate::models::{
    AllocateRequest, ApiEnvelope, HealthResponse, LatencySensitivityRequest,
    LatencySensitivityResponse, MarketImpactRequest, MarketImpactResponse, MetricsResponse,
    QuickScanQuery, ScanRequest, ScanResponse, ServiceInfo,
};

/// Default per-scan wall-clock budget.
const DEFAULT_SCAN_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone)]
struct AppState {
    ctx: Arc<EngineContext>,
    scan_timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let scan_timeout_ms = std::env::var("SCAN_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SCAN_TIMEOUT_MS);
    let state = AppState {
        ctx: Arc::new(EngineContext::new()),
        scan_timeout: Duration::from_millis(scan_timeout_ms),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/scan", post(scan_handler))
        .route("/quick-scan", post(quick_scan_handler))
        .route("/metrics", get(metrics_handler))
        .route("/allocate", post(allocate_handler))
        .route("/stress-test/:id", get(stress_test_handler))
        .route("/market-impact", post(market_impact_handler))
        .route("/latency-sensitivity", post(latency_sensitivity_handler))
        .with_state(state)
        .layer(cors);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid listen address")?;
    info!(%addr, scan_timeout_ms, "starting arbscope server");

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind listen address")?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Run one scan on the blocking pool with a timeout watchdog holding the
/// cancellation token.
async fn run_scan_with_timeout(
    state: &AppState,
    edges: Vec<EdgeInput>,
    capital: f64,
    options: ScanOptions,
) -> Result<ScanResponse, EngineError> {
    let cancel = CancellationToken::new();
    let watchdog_token = cancel.clone();
    let timeout = state.scan_timeout;
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        watchdog_token.cancel();
    });

    let ctx = Arc::clone(&state.ctx);
    let report = tokio::task::spawn_blocking(move || {
        scan(&ctx, &edges, capital, &options, &cancel)
    })
    .await
    .map_err(|e| {
        error!(error = %e, "scan task panicked");
        EngineError::Internal(format!("scan task failed: {e}"))
    })??;

    Ok(ScanResponse {
        scan_id: format!("scan_{}", Uuid::new_v4()),
        report,
    })
}

async fn root_handler() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp_ms: Utc::now().timestamp_millis(),
        total_scans: state.ctx.metrics.read().total_scans,
        opportunities_cached: state.ctx.opportunities.read().len(),
    })
}

async fn scan_handler(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Json<ApiEnvelope<ScanResponse>> {
    let started = Instant::now();
    let options = request.options();
    let result =
        run_scan_with_timeout(&state, request.market_data, request.capital, options).await;
    Json(match result {
        Ok(response) => ApiEnvelope::ok(response, elapsed_ms(started)),
        Err(e) => ApiEnvelope::err(&e, elapsed_ms(started)),
    })
}

async fn quick_scan_handler(
    State(state): State<AppState>,
    Query(query): Query<QuickScanQuery>,
) -> Json<ApiEnvelope<ScanResponse>> {
    let started = Instant::now();
    let seed = query.seed.unwrap_or(0);
    let edges = match quick_scan_edges(query.use_real_data, seed) {
        Ok(edges) => edges,
        Err(e) => return Json(ApiEnvelope::err(&e, elapsed_ms(started))),
    };
    let options = ScanOptions {
        seed: Some(seed),
        ..ScanOptions::default()
    };
    let result = run_scan_with_timeout(&state, edges, 1_000.0, options).await;
    Json(match result {
        Ok(response) => ApiEnvelope::ok(response, elapsed_ms(started)),
        Err(e) => ApiEnvelope::err(&e, elapsed_ms(started)),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Json<ApiEnvelope<MetricsResponse>> {
    let started = Instant::now();
    let response = MetricsResponse {
        system: state.ctx.metrics.read().snapshot(),
        persistence: state.ctx.persistence_summary(None),
        opportunities_cached: state.ctx.opportunities.read().len(),
    };
    Json(ApiEnvelope::ok(response, elapsed_ms(started)))
}

async fn allocate_handler(
    State(state): State<AppState>,
    Json(request): Json<AllocateRequest>,
) -> Json<ApiEnvelope<AllocationPlan>> {
    let started = Instant::now();
    let result = allocate_from_cache(
        &state.ctx,
        &request.opportunity_ids,
        request.capital,
        request.mode,
        &request.allocator_config(),
    );
    Json(match result {
        Ok(plan) => ApiEnvelope::ok(plan, elapsed_ms(started)),
        Err(e) => ApiEnvelope::err(&e, elapsed_ms(started)),
    })
}

async fn stress_test_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ApiEnvelope<StressReport>> {
    let started = Instant::now();
    let ctx = Arc::clone(&state.ctx);
    let cancel = CancellationToken::new();
    let result = tokio::task::spawn_blocking(move || stress_from_cache(&ctx, &id, &cancel))
        .await
        .map_err(|e| EngineError::Internal(format!("stress task failed: {e}")))
        .and_then(|r| r);
    Json(match result {
        Ok(report) => ApiEnvelope::ok(report, elapsed_ms(started)),
        Err(e) => ApiEnvelope::err(&e, elapsed_ms(started)),
    })
}

async fn market_impact_handler(
    Json(request): Json<MarketImpactRequest>,
) -> Json<ApiEnvelope<MarketImpactResponse>> {
    let started = Instant::now();
    Json(match request.evaluate() {
        Ok(response) => ApiEnvelope::ok(response, elapsed_ms(started)),
        Err(e) => ApiEnvelope::err(&e, elapsed_ms(started)),
    })
}

async fn latency_sensitivity_handler(
    Json(request): Json<LatencySensitivityRequest>,
) -> Json<ApiEnvelope<LatencySensitivityResponse>> {
    let started = Instant::now();
    Json(match request.evaluate() {
        Ok(response) => ApiEnvelope::ok(response, elapsed_ms(started)),
        Err(e) => ApiEnvelope::err(&e, elapsed_ms(started)),
    })
}
