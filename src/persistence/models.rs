//! Database row shapes (C12). Money and quantity columns are stored as
//! `TEXT` to preserve decimal precision; the repository layer parses them
//! into `crate::decimal::Decimal` on the way out and renders them back to
//! strings on the way in.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct TradingConfigurationRow {
    pub id: String,
    pub operator_id: String,
    pub enabled_pairs: String, // comma-separated symbols
    pub max_purchase_amount: String,
    pub price_tolerance_bps: i64,
    pub daily_spending_limit: String,
    pub max_trades_per_hour: i64,
    pub polling_interval_ms: i64,
    pub order_timeout_ms: i64,
    pub recv_window_ms: i64,
    pub profit_target_bps: i64,
    pub stop_loss_bps: i64,
    pub time_based_exit_minutes: i64,
    pub trailing_stop_bps: Option<i64>,
    pub sell_strategy: String,
    pub safety_enabled: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ListingEventRow {
    pub id: String,
    pub symbol: String,
    pub vcoin_id: Option<String>,
    pub detection_source: String,
    pub confidence: String,
    pub listing_time: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
    pub freshness_deadline: DateTime<Utc>,
    pub processed: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct TradeAttemptRow {
    pub id: String,
    pub listing_event_id: Option<String>,
    pub configuration_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: String,
    pub price: Option<String>,
    pub status: String,
    pub order_id: Option<String>,
    pub executed_quantity: Option<String>,
    pub executed_price: Option<String>,
    pub commission: Option<String>,
    pub detected_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub parent_trade_id: Option<String>,
    pub position_id: Option<String>,
    pub sell_reason: Option<String>,
    pub configuration_snapshot: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TradeLogRow {
    pub id: String,
    pub trade_attempt_id: String,
    pub raw_exchange_response: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BotRunRow {
    pub id: String,
    pub configuration_id: String,
    pub operator_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub last_heartbeat: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BotStatusRow {
    pub is_running: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub exchange_api_status: String,
    pub api_response_time_ms: Option<i64>,
    pub consecutive_errors: i64,
}

/// Input for `TradeAttemptRepository::create` — a PENDING row created
/// before the exchange call, filled in by `mark_success`/`mark_failed`.
#[derive(Debug, Clone)]
pub struct CreateTradeAttempt {
    pub id: String,
    pub listing_event_id: Option<String>,
    pub configuration_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: String,
    pub price: Option<String>,
    pub detected_at: Option<DateTime<Utc>>,
    pub parent_trade_id: Option<String>,
    pub position_id: Option<String>,
    pub sell_reason: Option<String>,
    pub configuration_snapshot: String,
}
