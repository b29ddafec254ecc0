//! Data access layer (C12) — one repository per entity, each wrapping a
//! `sqlx::query_as` call and mapping failures into `DatabaseError`.

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::decimal::Decimal;
use crate::domain::entities::{
    BotRun, BotRunStatus, BotStatus, Confidence, DetectionSource, ListingEvent, OrderType, SellStrategy, TradeAttempt,
    TradeLog, TradeSide, TradeStatus, TradingConfiguration,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, error};
use uuid::Uuid;

fn parse_decimal(s: &str, field: &str) -> Result<Decimal, DatabaseError> {
    Decimal::from_str(s).map_err(|e| DatabaseError::QueryError(format!("bad decimal in {field}: {e}")))
}

fn parse_uuid(s: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::from_str(s).map_err(|e| DatabaseError::QueryError(format!("bad uuid in {field}: {e}")))
}

// ---------------------------------------------------------------- configs

pub struct TradingConfigRepository {
    pool: DbPool,
}

impl TradingConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        TradingConfigRepository { pool }
    }

    /// §3 invariant: at most one active configuration per operator.
    /// Enforced here by deactivating any currently-active row before
    /// inserting, inside the same connection pool's implicit atomicity
    /// per statement (SQLite autocommits each statement).
    pub async fn activate(&self, config: &TradingConfiguration) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE trading_configurations SET is_active = 0 WHERE operator_id = ?1 AND is_active = 1")
            .bind(config.operator_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to deactivate existing configurations");
                DatabaseError::QueryError(format!("deactivate configs: {e}"))
            })?;

        sqlx::query(
            r#"
            INSERT INTO trading_configurations (
                id, operator_id, enabled_pairs, max_purchase_amount, price_tolerance_bps,
                daily_spending_limit, max_trades_per_hour, polling_interval_ms, order_timeout_ms,
                recv_window_ms, profit_target_bps, stop_loss_bps, time_based_exit_minutes,
                trailing_stop_bps, sell_strategy, safety_enabled, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(config.id.to_string())
        .bind(config.operator_id.to_string())
        .bind(config.enabled_pairs.iter().cloned().collect::<Vec<_>>().join(","))
        .bind(config.max_purchase_amount.to_string())
        .bind(config.price_tolerance_bps)
        .bind(config.daily_spending_limit.to_string())
        .bind(config.max_trades_per_hour as i64)
        .bind(config.polling_interval_ms as i64)
        .bind(config.order_timeout_ms as i64)
        .bind(config.recv_window_ms as i64)
        .bind(config.profit_target_bps)
        .bind(config.stop_loss_bps)
        .bind(config.time_based_exit_minutes)
        .bind(config.trailing_stop_bps)
        .bind(sell_strategy_to_str(config.sell_strategy))
        .bind(config.safety_enabled)
        .bind(config.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to insert trading configuration");
            DatabaseError::QueryError(format!("insert configuration: {e}"))
        })?;

        debug!(id = %config.id, "activated trading configuration");
        Ok(())
    }

    pub async fn get_active(&self, operator_id: Uuid) -> Result<Option<TradingConfiguration>, DatabaseError> {
        let row = sqlx::query_as::<_, TradingConfigurationRow>(
            "SELECT * FROM trading_configurations WHERE operator_id = ?1 AND is_active = 1 LIMIT 1",
        )
        .bind(operator_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to load active configuration");
            DatabaseError::QueryError(format!("get_active: {e}"))
        })?;

        row.map(row_to_configuration).transpose()
    }
}

fn sell_strategy_to_str(strategy: SellStrategy) -> &'static str {
    match strategy {
        SellStrategy::ProfitTarget => "PROFIT_TARGET",
        SellStrategy::StopLoss => "STOP_LOSS",
        SellStrategy::TimeBased => "TIME_BASED",
        SellStrategy::TrailingStop => "TRAILING_STOP",
        SellStrategy::Combined => "COMBINED",
    }
}

fn sell_strategy_from_str(s: &str) -> Result<SellStrategy, DatabaseError> {
    Ok(match s {
        "PROFIT_TARGET" => SellStrategy::ProfitTarget,
        "STOP_LOSS" => SellStrategy::StopLoss,
        "TIME_BASED" => SellStrategy::TimeBased,
        "TRAILING_STOP" => SellStrategy::TrailingStop,
        "COMBINED" => SellStrategy::Combined,
        other => return Err(DatabaseError::QueryError(format!("unknown sell strategy: {other}"))),
    })
}

fn row_to_configuration(row: TradingConfigurationRow) -> Result<TradingConfiguration, DatabaseError> {
    Ok(TradingConfiguration {
        id: parse_uuid(&row.id, "trading_configurations.id")?,
        operator_id: parse_uuid(&row.operator_id, "trading_configurations.operator_id")?,
        enabled_pairs: row
            .enabled_pairs
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<HashSet<_>>(),
        max_purchase_amount: parse_decimal(&row.max_purchase_amount, "max_purchase_amount")?,
        price_tolerance_bps: row.price_tolerance_bps,
        daily_spending_limit: parse_decimal(&row.daily_spending_limit, "daily_spending_limit")?,
        max_trades_per_hour: row.max_trades_per_hour as u32,
        polling_interval_ms: row.polling_interval_ms as u64,
        order_timeout_ms: row.order_timeout_ms as u64,
        recv_window_ms: row.recv_window_ms as u64,
        profit_target_bps: row.profit_target_bps,
        stop_loss_bps: row.stop_loss_bps,
        time_based_exit_minutes: row.time_based_exit_minutes,
        trailing_stop_bps: row.trailing_stop_bps,
        sell_strategy: sell_strategy_from_str(&row.sell_strategy)?,
        safety_enabled: row.safety_enabled,
        is_active: row.is_active,
    })
}

// ----------------------------------------------------------- listing events

pub struct ListingEventRepository {
    pool: DbPool,
}

impl ListingEventRepository {
    pub fn new(pool: DbPool) -> Self {
        ListingEventRepository { pool }
    }

    pub async fn append(&self, event: &ListingEvent) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO listing_events (
                id, symbol, vcoin_id, detection_source, confidence,
                listing_time, detected_at, freshness_deadline, processed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.symbol)
        .bind(&event.vcoin_id)
        .bind(detection_source_to_str(event.detection_source))
        .bind(confidence_to_str(event.confidence))
        .bind(event.listing_time)
        .bind(event.detected_at)
        .bind(event.freshness_deadline)
        .bind(event.processed)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, symbol = %event.symbol, "failed to append listing event");
            DatabaseError::QueryError(format!("append listing event: {e}"))
        })?;
        Ok(())
    }

    /// §4.6 dedup check: has this (symbol, source) combination fired in
    /// the last 60 seconds?
    pub async fn exists_recent(&self, symbol: &str, source: DetectionSource, within: chrono::Duration) -> Result<bool, DatabaseError> {
        let cutoff = Utc::now() - within;
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM listing_events WHERE symbol = ?1 AND detection_source = ?2 AND detected_at >= ?3",
        )
        .bind(symbol)
        .bind(detection_source_to_str(source))
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("exists_recent: {e}")))?;
        Ok(count.0 > 0)
    }

    /// §4.7: the 100 newest unprocessed signals still within their
    /// freshness window, newest first.
    pub async fn get_unprocessed(&self) -> Result<Vec<ListingEvent>, DatabaseError> {
        let rows = sqlx::query_as::<_, ListingEventRow>(
            r#"
            SELECT * FROM listing_events
            WHERE processed = 0 AND freshness_deadline > ?1
            ORDER BY detected_at DESC
            LIMIT 100
            "#,
        )
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("get_unprocessed: {e}")))?;

        rows.into_iter().map(row_to_listing_event).collect()
    }

    pub async fn mark_processed(&self, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE listing_events SET processed = 1 WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("mark_processed: {e}")))?;
        Ok(())
    }

    /// `GET /trading/recent-listings?hours=&symbol=` source: every signal
    /// detected within the last `hours`, optionally filtered to one symbol.
    pub async fn recent_since(&self, hours: i64, symbol: Option<&str>) -> Result<Vec<ListingEvent>, DatabaseError> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query_as::<_, ListingEventRow>(
                    "SELECT * FROM listing_events WHERE detected_at >= ?1 AND symbol = ?2 ORDER BY detected_at DESC",
                )
                .bind(cutoff)
                .bind(symbol)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, ListingEventRow>("SELECT * FROM listing_events WHERE detected_at >= ?1 ORDER BY detected_at DESC")
                    .bind(cutoff)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| DatabaseError::QueryError(format!("recent_since: {e}")))?;

        rows.into_iter().map(row_to_listing_event).collect()
    }

    /// `GET /trading/upcoming-listings?hours=` source: calendar entries
    /// whose listing time falls within the next `hours`.
    pub async fn upcoming(&self, hours: i64) -> Result<Vec<ListingEvent>, DatabaseError> {
        let now = Utc::now();
        let horizon = now + chrono::Duration::hours(hours);
        let rows = sqlx::query_as::<_, ListingEventRow>(
            "SELECT * FROM listing_events WHERE listing_time IS NOT NULL AND listing_time BETWEEN ?1 AND ?2 ORDER BY listing_time ASC",
        )
        .bind(now)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("upcoming: {e}")))?;

        rows.into_iter().map(row_to_listing_event).collect()
    }
}

fn detection_source_to_str(source: DetectionSource) -> &'static str {
    match source {
        DetectionSource::Calendar => "CALENDAR",
        DetectionSource::SymbolComparison => "SYMBOL_COMPARISON",
    }
}

fn confidence_to_str(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "HIGH",
        Confidence::Medium => "MEDIUM",
        Confidence::Low => "LOW",
    }
}

fn row_to_listing_event(row: ListingEventRow) -> Result<ListingEvent, DatabaseError> {
    Ok(ListingEvent {
        id: parse_uuid(&row.id, "listing_events.id")?,
        symbol: row.symbol,
        vcoin_id: row.vcoin_id,
        detection_source: match row.detection_source.as_str() {
            "CALENDAR" => DetectionSource::Calendar,
            "SYMBOL_COMPARISON" => DetectionSource::SymbolComparison,
            other => return Err(DatabaseError::QueryError(format!("unknown detection source: {other}"))),
        },
        confidence: match row.confidence.as_str() {
            "HIGH" => Confidence::High,
            "MEDIUM" => Confidence::Medium,
            "LOW" => Confidence::Low,
            other => return Err(DatabaseError::QueryError(format!("unknown confidence: {other}"))),
        },
        listing_time: row.listing_time,
        detected_at: row.detected_at,
        freshness_deadline: row.freshness_deadline,
        processed: row.processed,
    })
}

// ------------------------------------------------------------ trade attempts

pub struct TradeAttemptRepository {
    pool: DbPool,
}

impl TradeAttemptRepository {
    pub fn new(pool: DbPool) -> Self {
        TradeAttemptRepository { pool }
    }

    pub async fn create_pending(&self, input: CreateTradeAttempt) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO trade_attempts (
                id, listing_event_id, configuration_id, symbol, side, order_type, quantity, price,
                status, retry_count, detected_at, parent_trade_id, position_id, sell_reason, configuration_snapshot
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'PENDING', 0, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&input.id)
        .bind(&input.listing_event_id)
        .bind(&input.configuration_id)
        .bind(&input.symbol)
        .bind(&input.side)
        .bind(&input.order_type)
        .bind(&input.quantity)
        .bind(&input.price)
        .bind(input.detected_at)
        .bind(&input.parent_trade_id)
        .bind(&input.position_id)
        .bind(&input.sell_reason)
        .bind(&input.configuration_snapshot)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, symbol = %input.symbol, "failed to create pending trade attempt");
            DatabaseError::QueryError(format!("create_pending: {e}"))
        })?;
        Ok(())
    }

    pub async fn mark_success(
        &self,
        id: &str,
        order_id: &str,
        executed_quantity: Decimal,
        executed_price: Decimal,
        commission: Decimal,
        submitted_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        latency_ms: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE trade_attempts
            SET status = 'SUCCESS', order_id = ?1, executed_quantity = ?2, executed_price = ?3,
                commission = ?4, submitted_at = ?5, completed_at = ?6, latency_ms = ?7
            WHERE id = ?8
            "#,
        )
        .bind(order_id)
        .bind(executed_quantity.to_string())
        .bind(executed_price.to_string())
        .bind(commission.to_string())
        .bind(submitted_at)
        .bind(completed_at)
        .bind(latency_ms)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("mark_success: {e}")))?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error_code: &str, error_message: &str, completed_at: DateTime<Utc>) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE trade_attempts
            SET status = 'FAILED', error_code = ?1, error_message = ?2, completed_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(error_code)
        .bind(error_message)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("mark_failed: {e}")))?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<TradeAttempt>, DatabaseError> {
        let row = sqlx::query_as::<_, TradeAttemptRow>("SELECT * FROM trade_attempts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("get trade attempt: {e}")))?;
        row.map(row_to_trade_attempt).transpose()
    }

    /// `GET /trading/history?limit=` source: every trade attempt, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<TradeAttempt>, DatabaseError> {
        let rows = sqlx::query_as::<_, TradeAttemptRow>("SELECT * FROM trade_attempts ORDER BY created_at DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("recent: {e}")))?;
        rows.into_iter().map(row_to_trade_attempt).collect()
    }

    /// C8 rebuild step 1: SUCCESS BUY rows, most recent first.
    pub async fn success_buys_desc(&self) -> Result<Vec<TradeAttempt>, DatabaseError> {
        let rows = sqlx::query_as::<_, TradeAttemptRow>(
            "SELECT * FROM trade_attempts WHERE side = 'BUY' AND status = 'SUCCESS' ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("success_buys_desc: {e}")))?;
        rows.into_iter().map(row_to_trade_attempt).collect()
    }

    /// C5 safety gate: count of rows submitted since `since`.
    pub async fn trades_submitted_since(&self, since: DateTime<Utc>) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_attempts WHERE submitted_at >= ?1")
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("trades_submitted_since: {e}")))?;
        Ok(row.0)
    }

    /// C5 safety gate: Σ quoteQty of SUCCESS BUYs since `since`.
    pub async fn quote_spent_since(&self, since: DateTime<Utc>) -> Result<Decimal, DatabaseError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT executed_quantity, executed_price FROM trade_attempts
            WHERE side = 'BUY' AND status = 'SUCCESS' AND submitted_at >= ?1
              AND executed_quantity IS NOT NULL AND executed_price IS NOT NULL
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("quote_spent_since: {e}")))?;

        let mut total = Decimal::ZERO;
        for (qty, price) in rows {
            let qty = parse_decimal(&qty, "executed_quantity")?;
            let price = parse_decimal(&price, "executed_price")?;
            if let Some(notional) = qty.checked_mul(price) {
                total = total.checked_add(notional).unwrap_or(total);
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl crate::domain::services::safety_checker::TradeActivitySource for TradeAttemptRepository {
    async fn trades_submitted_since(&self, since: DateTime<Utc>) -> Result<i64, crate::error::TradingError> {
        Ok(TradeAttemptRepository::trades_submitted_since(self, since).await?)
    }
    async fn quote_spent_since(&self, since: DateTime<Utc>) -> Result<Decimal, crate::error::TradingError> {
        Ok(TradeAttemptRepository::quote_spent_since(self, since).await?)
    }
}

fn row_to_trade_attempt(row: TradeAttemptRow) -> Result<TradeAttempt, DatabaseError> {
    Ok(TradeAttempt {
        id: parse_uuid(&row.id, "trade_attempts.id")?,
        listing_event_id: row.listing_event_id.map(|s| parse_uuid(&s, "listing_event_id")).transpose()?,
        configuration_id: parse_uuid(&row.configuration_id, "configuration_id")?,
        symbol: row.symbol,
        side: match row.side.as_str() {
            "BUY" => TradeSide::Buy,
            "SELL" => TradeSide::Sell,
            other => return Err(DatabaseError::QueryError(format!("unknown side: {other}"))),
        },
        order_type: match row.order_type.as_str() {
            "MARKET" => OrderType::Market,
            "LIMIT" => OrderType::Limit,
            other => return Err(DatabaseError::QueryError(format!("unknown order type: {other}"))),
        },
        quantity: parse_decimal(&row.quantity, "quantity")?,
        price: row.price.map(|s| parse_decimal(&s, "price")).transpose()?,
        status: match row.status.as_str() {
            "PENDING" => TradeStatus::Pending,
            "SUCCESS" => TradeStatus::Success,
            "FAILED" => TradeStatus::Failed,
            "CANCELED" => TradeStatus::Canceled,
            other => return Err(DatabaseError::QueryError(format!("unknown status: {other}"))),
        },
        order_id: row.order_id,
        executed_quantity: row.executed_quantity.map(|s| parse_decimal(&s, "executed_quantity")).transpose()?,
        executed_price: row.executed_price.map(|s| parse_decimal(&s, "executed_price")).transpose()?,
        commission: row.commission.map(|s| parse_decimal(&s, "commission")).transpose()?,
        detected_at: row.detected_at,
        submitted_at: row.submitted_at,
        completed_at: row.completed_at,
        latency_ms: row.latency_ms,
        error_code: row.error_code,
        error_message: row.error_message,
        retry_count: row.retry_count as u32,
        parent_trade_id: row.parent_trade_id.map(|s| parse_uuid(&s, "parent_trade_id")).transpose()?,
        position_id: row.position_id.map(|s| parse_uuid(&s, "position_id")).transpose()?,
        sell_reason: row.sell_reason,
        configuration_snapshot: serde_json::from_str(&row.configuration_snapshot).unwrap_or(serde_json::json!({})),
    })
}

// ---------------------------------------------------------------- trade logs

pub struct TradeLogRepository {
    pool: DbPool,
}

impl TradeLogRepository {
    pub fn new(pool: DbPool) -> Self {
        TradeLogRepository { pool }
    }

    pub async fn append(&self, log: &TradeLog) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO trade_logs (id, trade_attempt_id, raw_exchange_response, recorded_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(log.id.to_string())
        .bind(log.trade_attempt_id.to_string())
        .bind(log.raw_exchange_response.to_string())
        .bind(log.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("append trade log: {e}")))?;
        Ok(())
    }
}

// -------------------------------------------------------------------- bot run

pub struct BotRunRepository {
    pool: DbPool,
}

impl BotRunRepository {
    pub fn new(pool: DbPool) -> Self {
        BotRunRepository { pool }
    }

    /// §3 invariant: at most one row with an active status per
    /// configuration. Caller must check `has_active_run` first; this
    /// repository does not itself serialize across processes.
    pub async fn has_active_run(&self, configuration_id: Uuid) -> Result<bool, DatabaseError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM bot_runs WHERE configuration_id = ?1 AND status IN ('STARTING', 'RUNNING', 'STOPPING')",
        )
        .bind(configuration_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("has_active_run: {e}")))?;
        Ok(count.0 > 0)
    }

    pub async fn create(&self, run: &BotRun) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO bot_runs (id, configuration_id, operator_id, status, started_at, stopped_at, last_heartbeat, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.configuration_id.to_string())
        .bind(run.operator_id.to_string())
        .bind(bot_run_status_to_str(run.status))
        .bind(run.started_at)
        .bind(run.stopped_at)
        .bind(run.last_heartbeat)
        .bind(&run.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("create bot run: {e}")))?;
        Ok(())
    }

    pub async fn update_status(&self, id: Uuid, status: BotRunStatus, stopped_at: Option<DateTime<Utc>>) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE bot_runs SET status = ?1, stopped_at = ?2 WHERE id = ?3")
            .bind(bot_run_status_to_str(status))
            .bind(stopped_at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("update_status: {e}")))?;
        Ok(())
    }

    pub async fn heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE bot_runs SET last_heartbeat = ?1 WHERE id = ?2")
            .bind(at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("heartbeat: {e}")))?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, error_message: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE bot_runs SET status = 'FAILED', stopped_at = ?1, error_message = ?2 WHERE id = ?3")
            .bind(at)
            .bind(error_message)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("mark_failed: {e}")))?;
        Ok(())
    }
}

fn bot_run_status_to_str(status: BotRunStatus) -> &'static str {
    match status {
        BotRunStatus::Starting => "STARTING",
        BotRunStatus::Running => "RUNNING",
        BotRunStatus::Stopping => "STOPPING",
        BotRunStatus::Stopped => "STOPPED",
        BotRunStatus::Failed => "FAILED",
    }
}

// ----------------------------------------------------------------- bot status

pub struct BotStatusRepository {
    pool: DbPool,
}

impl BotStatusRepository {
    pub fn new(pool: DbPool) -> Self {
        BotStatusRepository { pool }
    }

    pub async fn upsert(&self, status: &BotStatus) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO bot_status (id, is_running, last_heartbeat, exchange_api_status, api_response_time_ms, consecutive_errors)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                is_running = excluded.is_running,
                last_heartbeat = excluded.last_heartbeat,
                exchange_api_status = excluded.exchange_api_status,
                api_response_time_ms = excluded.api_response_time_ms,
                consecutive_errors = excluded.consecutive_errors
            "#,
        )
        .bind(status.is_running)
        .bind(status.last_heartbeat)
        .bind(&status.exchange_api_status)
        .bind(status.api_response_time_ms)
        .bind(status.consecutive_errors as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("upsert bot status: {e}")))?;
        Ok(())
    }

    pub async fn get(&self) -> Result<Option<BotStatus>, DatabaseError> {
        let row = sqlx::query_as::<_, BotStatusRow>("SELECT * FROM bot_status WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("get bot status: {e}")))?;
        Ok(row.map(|r| BotStatus {
            is_running: r.is_running,
            last_heartbeat: r.last_heartbeat,
            exchange_api_status: r.exchange_api_status,
            api_response_time_ms: r.api_response_time_ms,
            consecutive_errors: r.consecutive_errors as u32,
        }))
    }
}

/// Adapts `TradingConfigRepository` to the single active-configuration view
/// the trade executor wants, for a fixed operator (this crate runs one
/// operator per process).
pub struct SingleOperatorConfigSource {
    repo: TradingConfigRepository,
    operator_id: Uuid,
}

impl SingleOperatorConfigSource {
    pub fn new(repo: TradingConfigRepository, operator_id: Uuid) -> Self {
        SingleOperatorConfigSource { repo, operator_id }
    }
}

#[async_trait]
impl crate::domain::services::trade_executor::ConfigSource for SingleOperatorConfigSource {
    async fn active_configuration(&self) -> Result<Option<TradingConfiguration>, crate::error::TradingError> {
        Ok(self.repo.get_active(self.operator_id).await?)
    }
}

#[async_trait]
impl crate::domain::services::trade_executor::TradeAttemptStore for TradeAttemptRepository {
    async fn create_pending(&self, attempt: &TradeAttempt) -> Result<(), crate::error::TradingError> {
        TradeAttemptRepository::create_pending(
            self,
            CreateTradeAttempt {
                id: attempt.id.to_string(),
                listing_event_id: attempt.listing_event_id.map(|id| id.to_string()),
                configuration_id: attempt.configuration_id.to_string(),
                symbol: attempt.symbol.clone(),
                side: attempt.side.to_string(),
                order_type: attempt.order_type.to_string(),
                quantity: attempt.quantity.to_string(),
                price: attempt.price.map(|p| p.to_string()),
                detected_at: attempt.detected_at,
                parent_trade_id: attempt.parent_trade_id.map(|id| id.to_string()),
                position_id: attempt.position_id.map(|id| id.to_string()),
                sell_reason: attempt.sell_reason.clone(),
                configuration_snapshot: attempt.configuration_snapshot.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn mark_success(
        &self,
        attempt: &TradeAttempt,
        ack: &crate::infrastructure::mexc_client::OrderAck,
        submitted_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), crate::error::TradingError> {
        let latency_ms = (completed_at - submitted_at).num_milliseconds();
        TradeAttemptRepository::mark_success(
            self,
            &attempt.id.to_string(),
            &ack.order_id,
            ack.executed_quantity,
            ack.executed_price,
            ack.commission,
            submitted_at,
            completed_at,
            latency_ms,
        )
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        attempt: &TradeAttempt,
        error_code: &str,
        error_message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), crate::error::TradingError> {
        TradeAttemptRepository::mark_failed(self, &attempt.id.to_string(), error_code, error_message, completed_at).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<TradeAttempt>, crate::error::TradingError> {
        Ok(TradeAttemptRepository::get(self, &id.to_string()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    async fn test_pool() -> DbPool {
        init_database("sqlite::memory:").await.unwrap()
    }

    fn sample_config(operator_id: Uuid) -> TradingConfiguration {
        let mut config = TradingConfiguration::default_for(operator_id);
        config.is_active = true;
        config.enabled_pairs.insert("FOOUSDT".to_string());
        config
    }

    #[tokio::test]
    async fn activating_a_config_deactivates_the_previous_one() {
        let pool = test_pool().await;
        let repo = TradingConfigRepository::new(pool);
        let operator = Uuid::new_v4();

        let first = sample_config(operator);
        repo.activate(&first).await.unwrap();

        let mut second = sample_config(operator);
        second.id = Uuid::new_v4();
        repo.activate(&second).await.unwrap();

        let active = repo.get_active(operator).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
    }

    #[tokio::test]
    async fn listing_event_roundtrips_and_dedups() {
        let pool = test_pool().await;
        let repo = ListingEventRepository::new(pool);
        let event = ListingEvent {
            id: Uuid::new_v4(),
            symbol: "FOOUSDT".to_string(),
            vcoin_id: Some("v1".to_string()),
            detection_source: DetectionSource::SymbolComparison,
            confidence: Confidence::Medium,
            listing_time: None,
            detected_at: Utc::now(),
            freshness_deadline: Utc::now() + chrono::Duration::seconds(60),
            processed: false,
        };
        repo.append(&event).await.unwrap();

        let dup = repo
            .exists_recent("FOOUSDT", DetectionSource::SymbolComparison, chrono::Duration::seconds(60))
            .await
            .unwrap();
        assert!(dup);

        let unprocessed = repo.get_unprocessed().await.unwrap();
        assert_eq!(unprocessed.len(), 1);

        repo.mark_processed(event.id).await.unwrap();
        let unprocessed = repo.get_unprocessed().await.unwrap();
        assert!(unprocessed.is_empty());
    }

    #[tokio::test]
    async fn trade_attempt_success_flow_and_spend_aggregation() {
        let pool = test_pool().await;
        let repo = TradeAttemptRepository::new(pool);
        let id = Uuid::new_v4().to_string();

        repo.create_pending(CreateTradeAttempt {
            id: id.clone(),
            listing_event_id: None,
            configuration_id: Uuid::new_v4().to_string(),
            symbol: "FOOUSDT".to_string(),
            side: "BUY".to_string(),
            order_type: "MARKET".to_string(),
            quantity: "10".to_string(),
            price: None,
            detected_at: Some(Utc::now()),
            parent_trade_id: None,
            position_id: None,
            sell_reason: None,
            configuration_snapshot: "{}".to_string(),
        })
        .await
        .unwrap();

        let now = Utc::now();
        repo.mark_success(
            &id,
            "ex-1",
            Decimal::from_str("10").unwrap(),
            Decimal::from_str("1.5").unwrap(),
            Decimal::ZERO,
            now,
            now,
            50,
        )
        .await
        .unwrap();

        let attempt = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(attempt.status, TradeStatus::Success);

        let spent = repo.quote_spent_since(now - chrono::Duration::minutes(1)).await.unwrap();
        assert_eq!(spent, Decimal::from_str("15").unwrap());

        let buys = repo.success_buys_desc().await.unwrap();
        assert_eq!(buys.len(), 1);
    }

    #[tokio::test]
    async fn bot_run_lifecycle_tracks_active_state() {
        let pool = test_pool().await;
        let repo = BotRunRepository::new(pool);
        let config_id = Uuid::new_v4();
        let run = BotRun::start(config_id, Uuid::new_v4(), Utc::now());

        assert!(!repo.has_active_run(config_id).await.unwrap());
        repo.create(&run).await.unwrap();
        assert!(repo.has_active_run(config_id).await.unwrap());

        repo.update_status(run.id, BotRunStatus::Stopped, Some(Utc::now())).await.unwrap();
        assert!(!repo.has_active_run(config_id).await.unwrap());
    }

    #[tokio::test]
    async fn bot_status_upsert_overwrites_the_single_row() {
        let pool = test_pool().await;
        let repo = BotStatusRepository::new(pool);
        repo.upsert(&BotStatus {
            is_running: true,
            last_heartbeat: Some(Utc::now()),
            exchange_api_status: "OK".to_string(),
            api_response_time_ms: Some(42),
            consecutive_errors: 0,
        })
        .await
        .unwrap();

        repo.upsert(&BotStatus {
            is_running: false,
            last_heartbeat: Some(Utc::now()),
            exchange_api_status: "DOWN".to_string(),
            api_response_time_ms: None,
            consecutive_errors: 3,
        })
        .await
        .unwrap();

        let status = repo.get().await.unwrap().unwrap();
        assert!(!status.is_running);
        assert_eq!(status.consecutive_errors, 3);
    }
}
