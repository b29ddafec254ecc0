//! Process entrypoint: loads configuration and secrets, wires the
//! persistence/domain/infrastructure layers into a `TradingOrchestrator`,
//! and serves the Control API (§6) behind auth + rate-limit middleware,
//! grounded on the teacher's `main.rs` startup/shutdown shape.

use mexc_snipe_core::application::actors::listing_detector::ListingDetector;
use mexc_snipe_core::application::actors::position_monitor::PositionMonitor;
use mexc_snipe_core::application::orchestrator::TradingOrchestrator;
use mexc_snipe_core::config::AppConfig;
use mexc_snipe_core::decimal::Decimal;
use mexc_snipe_core::domain::entities::{BotRun, OrderType, TradeAttempt};
use mexc_snipe_core::domain::services::position_tracker::{PositionSource, PositionTracker};
use mexc_snipe_core::domain::services::risk_manager::{RiskConfig, RiskManager};
use mexc_snipe_core::domain::services::rules_cache::RulesCache;
use mexc_snipe_core::domain::services::safety_checker::SafetyChecker;
use mexc_snipe_core::domain::services::trade_executor::TradeExecutor;
use mexc_snipe_core::error::TradingError;
use mexc_snipe_core::infrastructure::mexc_client::MexcClient;
use mexc_snipe_core::persistence::repository::{
    BotRunRepository, BotStatusRepository, ListingEventRepository, SingleOperatorConfigSource, TradeAttemptRepository, TradeLogRepository,
    TradingConfigRepository,
};
use mexc_snipe_core::{auth, persistence, rate_limit, secrets};

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<TradingOrchestrator>,
    configs: Arc<TradingConfigRepository>,
    listings: Arc<ListingEventRepository>,
    attempts: Arc<TradeAttemptRepository>,
}

/// Bridges `TradeAttemptRepository` (persistence) and `MexcClient`
/// (infrastructure) into the single `PositionSource` the position
/// tracker wants; composing infra and persistence is a job for the
/// binary, not either layer alone.
struct ExchangePositionSource {
    attempts: Arc<TradeAttemptRepository>,
    exchange: Arc<MexcClient>,
}

#[async_trait]
impl PositionSource for ExchangePositionSource {
    async fn success_buys_desc(&self) -> Result<Vec<TradeAttempt>, TradingError> {
        self.attempts.success_buys_desc().await.map_err(TradingError::from)
    }

    async fn free_balances(&self) -> Result<HashMap<String, Decimal>, TradingError> {
        Ok(self.exchange.get_account().await?.balances)
    }

    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, TradingError> {
        Ok(self.exchange.get_ticker(symbol).await?.price)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("no .env file loaded: {e}");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("mexc-snipe starting up");

    let app_config = AppConfig::from_env();
    if let Err(e) = app_config.validate() {
        error!(error = %e, "configuration validation failed");
        return ExitCode::from(2);
    }

    let (api_key, api_secret) = match secrets::load_mexc_credentials() {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "failed to load MEXC credentials");
            return ExitCode::from(2);
        }
    };

    auth::init_api_keys();

    let database_url = app_config.database_url.clone().expect("validated above");
    let pool = match persistence::init_database(&database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "database unreachable at startup");
            return ExitCode::from(3);
        }
    };

    let exchange = Arc::new(MexcClient::new(app_config.mexc_base_url.clone(), api_key, api_secret, app_config.mexc_recv_window));

    let operator_id = std::env::var("OPERATOR_ID")
        .ok()
        .and_then(|s| Uuid::parse_str(&s).ok())
        .unwrap_or_else(Uuid::nil);

    let configs = Arc::new(TradingConfigRepository::new(pool.clone()));
    let listings = Arc::new(ListingEventRepository::new(pool.clone()));
    let attempts = Arc::new(TradeAttemptRepository::new(pool.clone()));
    let _trade_logs = Arc::new(TradeLogRepository::new(pool.clone()));
    let runs = Arc::new(BotRunRepository::new(pool.clone()));
    let status = Arc::new(BotStatusRepository::new(pool.clone()));
    let config_source = Arc::new(SingleOperatorConfigSource::new(TradingConfigRepository::new(pool.clone()), operator_id));

    let rules_cache = Arc::new(RulesCache::new());
    let risk = Arc::new(RiskManager::new(RiskConfig::default()));
    let safety = Arc::new(SafetyChecker::new(attempts.clone()));
    let position_source = Arc::new(ExchangePositionSource {
        attempts: attempts.clone(),
        exchange: exchange.clone(),
    });
    let positions = Arc::new(PositionTracker::new(position_source));

    let submission_limiter = rate_limit::create_trade_submission_limiter(app_config.max_trades_per_hour);
    let executor = Arc::new(TradeExecutor::new(
        exchange.clone(),
        rules_cache,
        safety,
        risk,
        positions.clone(),
        config_source.clone(),
        attempts.clone(),
        submission_limiter,
    ));
    let detector = Arc::new(ListingDetector::new(exchange.clone(), listings.clone()));
    let monitor = Arc::new(PositionMonitor::new(exchange.clone(), positions, config_source));

    let orchestrator = Arc::new(TradingOrchestrator::new(runs, status, listings.clone(), executor, detector, monitor));

    let app_state = AppState {
        orchestrator,
        configs,
        listings,
        attempts,
    };

    let public_routes = Router::new().route("/", get(|| async { "mexc-snipe trading core is running" })).route("/health", get(health_check));

    let rate_limiter = rate_limit::create_rate_limiter(rate_limit::RateLimiterConfig {
        requests_per_minute: app_config.control_api_rate_limit_per_minute,
    });

    let protected_routes = Router::new()
        .route("/bot/start", post(start_bot))
        .route("/bot/stop", post(stop_bot))
        .route("/bot/status", get(bot_status))
        .route("/trading/execute-manual-trade", post(execute_manual_trade))
        .route("/trading/history", get(trade_history))
        .route("/trading/recent-listings", get(recent_listings))
        .route("/trading/upcoming-listings", get(upcoming_listings))
        .route("/monitoring/system-status", get(system_status))
        .route_layer(middleware::from_fn(move |req, next| {
            let rate_limiter = rate_limiter.clone();
            rate_limit::rate_limit_middleware(rate_limiter, req, next)
        }))
        .route_layer(middleware::from_fn(auth::require_auth));

    let app = Router::new().merge(public_routes).merge(protected_routes).with_state(app_state);

    let listener = match tokio::net::TcpListener::bind(app_config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %app_config.bind_addr, "failed to bind control API listener");
            return ExitCode::from(1);
        }
    };
    info!(addr = %app_config.bind_addr, "control API listening");

    let result = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    info!("shutting down");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server exited with an error");
            ExitCode::from(1)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C"),
            Err(e) => error!(error = %e, "failed to install Ctrl+C handler"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("received SIGTERM");
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct StartBotRequest {
    configuration_id: Uuid,
    operator_id: Uuid,
}

#[derive(Debug, Serialize)]
struct StartBotResponse {
    run: BotRun,
    message: String,
}

async fn start_bot(State(state): State<AppState>, Json(request): Json<StartBotRequest>) -> Response {
    let config = match state.configs.get_active(request.operator_id).await {
        Ok(Some(config)) if config.id == request.configuration_id => config,
        Ok(Some(_)) | Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "message": "no active configuration matches configurationId" }))).into_response();
        }
        Err(e) => return internal_error(e.into()),
    };

    match state.orchestrator.start_trading_bot(config).await {
        Ok(run) => Json(StartBotResponse { run, message: "bot started".to_string() }).into_response(),
        Err(e) if e.to_string().contains("BOT_ALREADY_RUNNING") => {
            (StatusCode::CONFLICT, Json(serde_json::json!({ "message": "bot already running" }))).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "message": e.to_string() }))).into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
struct StopBotRequest {
    #[serde(rename = "runId")]
    run_id: Option<Uuid>,
}

async fn stop_bot(State(state): State<AppState>, body: Option<Json<StopBotRequest>>) -> Response {
    let _ = body.map(|Json(request)| request.run_id);
    let Some(run) = state.orchestrator.active_run().await else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "message": "no active bot run" }))).into_response();
    };

    match state.orchestrator.stop_trading_bot().await {
        Ok(()) => Json(serde_json::json!({ "run": run, "message": "bot stopped" })).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Serialize)]
struct BotStatusResponse {
    run: Option<BotRun>,
    metrics: Option<mexc_snipe_core::domain::entities::BotStatus>,
    is_running: bool,
}

async fn bot_status(State(state): State<AppState>) -> Response {
    let run = state.orchestrator.active_run().await;
    let metrics = match state.orchestrator.system_status().await {
        Ok(metrics) => metrics,
        Err(e) => return internal_error(e),
    };
    Json(BotStatusResponse { is_running: run.is_some(), run, metrics }).into_response()
}

#[derive(Debug, Deserialize)]
struct ManualTradeRequest {
    symbol: String,
    #[serde(default)]
    strategy: Option<String>,
}

async fn execute_manual_trade(State(state): State<AppState>, Json(request): Json<ManualTradeRequest>) -> Response {
    if state.orchestrator.active_run().await.is_none() {
        return (StatusCode::PRECONDITION_FAILED, Json(serde_json::json!({ "message": "bot not running" }))).into_response();
    }
    let order_type = match request.strategy.as_deref() {
        Some("LIMIT") => OrderType::Limit,
        _ => OrderType::Market,
    };
    let result = state.orchestrator.execute_manual_trade(&request.symbol, order_type).await;
    Json(result).into_response()
}

#[derive(Debug, Deserialize, Default)]
struct HistoryQuery {
    limit: Option<i64>,
}

async fn trade_history(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    match state.attempts.recent(limit).await {
        Ok(trades) => Json(serde_json::json!({ "trades": trades, "total": trades.len() })).into_response(),
        Err(e) => internal_error(e.into()),
    }
}

#[derive(Debug, Deserialize, Default)]
struct RecentListingsQuery {
    hours: Option<i64>,
    symbol: Option<String>,
}

async fn recent_listings(State(state): State<AppState>, Query(query): Query<RecentListingsQuery>) -> Response {
    let hours = query.hours.unwrap_or(24);
    match state.listings.recent_since(hours, query.symbol.as_deref()).await {
        Ok(listings) => Json(serde_json::json!({ "listings": listings, "total": listings.len() })).into_response(),
        Err(e) => internal_error(e.into()),
    }
}

#[derive(Debug, Deserialize, Default)]
struct UpcomingListingsQuery {
    hours: Option<i64>,
}

async fn upcoming_listings(State(state): State<AppState>, Query(query): Query<UpcomingListingsQuery>) -> Response {
    let hours = query.hours.unwrap_or(24);
    match state.listings.upcoming(hours).await {
        Ok(listings) => Json(serde_json::json!({ "listings": listings, "total": listings.len() })).into_response(),
        Err(e) => internal_error(e.into()),
    }
}

async fn system_status(State(state): State<AppState>) -> Response {
    match state.orchestrator.system_status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => internal_error(e),
    }
}

fn internal_error(e: mexc_snipe_core::error::TradingError) -> Response {
    warn!(error = %e, "control API request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "message": e.to_string() }))).into_response()
}
