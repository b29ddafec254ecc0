//! Persistence Layer (C12) — a small append-log interface over SQLite
//! for `TradingConfiguration`, `ListingEvent`, `TradeAttempt`, `TradeLog`,
//! `BotRun` and `BotStatus`. The DB is the single source of truth for all
//! durable state; every in-memory cache is a projection that may be
//! rebuilt from it.
//!
//! Schema bootstrap follows the teacher's `CREATE TABLE IF NOT EXISTS`
//! approach rather than a migration framework.

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub type DbPool = SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    MigrationError(String),

    #[error("query error: {0}")]
    QueryError(String),
}

impl From<DatabaseError> for crate::error::TradingError {
    fn from(e: DatabaseError) -> Self {
        crate::error::TradingError::Internal(e.to_string())
    }
}

pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!(database_url, "initializing database");

    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e))))?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .log_statements(tracing::log::LevelFilter::Debug);

    let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("database ready");
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("running schema bootstrap");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trading_configurations (
            id TEXT PRIMARY KEY,
            operator_id TEXT NOT NULL,
            enabled_pairs TEXT NOT NULL,
            max_purchase_amount TEXT NOT NULL,
            price_tolerance_bps INTEGER NOT NULL,
            daily_spending_limit TEXT NOT NULL,
            max_trades_per_hour INTEGER NOT NULL,
            polling_interval_ms INTEGER NOT NULL,
            order_timeout_ms INTEGER NOT NULL,
            recv_window_ms INTEGER NOT NULL,
            profit_target_bps INTEGER NOT NULL,
            stop_loss_bps INTEGER NOT NULL,
            time_based_exit_minutes INTEGER NOT NULL,
            trailing_stop_bps INTEGER,
            sell_strategy TEXT NOT NULL,
            safety_enabled BOOLEAN NOT NULL,
            is_active BOOLEAN NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("trading_configurations: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS listing_events (
            id TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            vcoin_id TEXT,
            detection_source TEXT NOT NULL,
            confidence TEXT NOT NULL,
            listing_time DATETIME,
            detected_at DATETIME NOT NULL,
            freshness_deadline DATETIME NOT NULL,
            processed BOOLEAN NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("listing_events: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trade_attempts (
            id TEXT PRIMARY KEY,
            listing_event_id TEXT,
            configuration_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('BUY', 'SELL')),
            order_type TEXT NOT NULL CHECK(order_type IN ('MARKET', 'LIMIT')),
            quantity TEXT NOT NULL,
            price TEXT,
            status TEXT NOT NULL CHECK(status IN ('PENDING', 'SUCCESS', 'FAILED', 'CANCELED')),
            order_id TEXT,
            executed_quantity TEXT,
            executed_price TEXT,
            commission TEXT,
            detected_at DATETIME,
            submitted_at DATETIME,
            completed_at DATETIME,
            latency_ms INTEGER,
            error_code TEXT,
            error_message TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            parent_trade_id TEXT,
            position_id TEXT,
            sell_reason TEXT,
            configuration_snapshot TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("trade_attempts: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trade_logs (
            id TEXT PRIMARY KEY,
            trade_attempt_id TEXT NOT NULL,
            raw_exchange_response TEXT NOT NULL,
            recorded_at DATETIME NOT NULL,
            FOREIGN KEY (trade_attempt_id) REFERENCES trade_attempts(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("trade_logs: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_runs (
            id TEXT PRIMARY KEY,
            configuration_id TEXT NOT NULL,
            operator_id TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at DATETIME NOT NULL,
            stopped_at DATETIME,
            last_heartbeat DATETIME NOT NULL,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("bot_runs: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            is_running BOOLEAN NOT NULL,
            last_heartbeat DATETIME,
            exchange_api_status TEXT NOT NULL,
            api_response_time_ms INTEGER,
            consecutive_errors INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("bot_status: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_listing_events_symbol ON listing_events(symbol, detected_at)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("index idx_listing_events_symbol: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_attempts_symbol ON trade_attempts(symbol, status)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("index idx_trade_attempts_symbol: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_attempts_submitted_at ON trade_attempts(submitted_at)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("index idx_trade_attempts_submitted_at: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bot_runs_configuration ON bot_runs(configuration_id, status)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("index idx_bot_runs_configuration: {e}")))?;

    info!("schema bootstrap complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_all_tables() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('trading_configurations', 'listing_events', 'trade_attempts', 'trade_logs', 'bot_runs', 'bot_status')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(result.0, 6);
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        assert!(run_migrations(&pool).await.is_ok());
    }
}
