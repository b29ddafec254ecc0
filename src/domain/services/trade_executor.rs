//! Trade Executor (C10) — the single gate pipeline every BUY and SELL
//! passes through: rate caps (C5) → order validation (C3) → risk (C4) →
//! submit (C1) → persist (C12) → position update (C8).
//!
//! Grounded directly on the teacher's order-execution services: the same
//! pipeline shape, generalized from signal-driven limit orders to MEXC's
//! market/limit snipe-and-exit flow.

use crate::decimal::Decimal;
use crate::domain::entities::{OrderType, Position, TradeAttempt, TradeSide, TradeStatus, TradingConfiguration};
use crate::domain::services::order_validator;
use crate::domain::services::risk_manager::{OrderRiskRequest, RiskManager};
use crate::domain::services::safety_checker::SafetyLimits;
use crate::domain::services::rules_cache::RulesCache;
use crate::error::TradingError;
use crate::infrastructure::mexc_client::OrderAck;
use async_trait::async_trait;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn active_configuration(&self) -> Result<Option<TradingConfiguration>, TradingError>;
}

#[async_trait]
pub trait TradeAttemptStore: Send + Sync {
    async fn create_pending(&self, attempt: &TradeAttempt) -> Result<(), TradingError>;
    async fn mark_success(&self, attempt: &TradeAttempt, ack: &OrderAck, submitted_at: chrono::DateTime<Utc>, completed_at: chrono::DateTime<Utc>) -> Result<(), TradingError>;
    async fn mark_failed(&self, attempt: &TradeAttempt, error_code: &str, error_message: &str, completed_at: chrono::DateTime<Utc>) -> Result<(), TradingError>;
    async fn get(&self, id: Uuid) -> Result<Option<TradeAttempt>, TradingError>;
}

#[async_trait]
pub trait SafetyGate: Send + Sync {
    async fn check(&self, quote_amount: Decimal, limits: &SafetyLimits) -> crate::domain::services::safety_checker::SafetyCheckResult;
}

#[async_trait]
impl<S: crate::domain::services::safety_checker::TradeActivitySource> SafetyGate for crate::domain::services::safety_checker::SafetyChecker<S> {
    async fn check(&self, quote_amount: Decimal, limits: &SafetyLimits) -> crate::domain::services::safety_checker::SafetyCheckResult {
        crate::domain::services::safety_checker::SafetyChecker::check(self, quote_amount, limits).await
    }
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn get(&self, symbol: &str) -> Option<Position>;
    async fn snapshot(&self) -> Vec<Position>;
    async fn add_position(&self, position: Position);
    async fn remove_position(&self, symbol: &str);
    async fn update_position(&self, symbol: &str, current_price: Option<Decimal>, quantity_delta: Option<Decimal>);
}

#[async_trait]
impl<P: crate::domain::services::position_tracker::PositionSource> PositionStore for crate::domain::services::position_tracker::PositionTracker<P> {
    async fn get(&self, symbol: &str) -> Option<Position> {
        crate::domain::services::position_tracker::PositionTracker::get(self, symbol).await
    }
    async fn snapshot(&self) -> Vec<Position> {
        crate::domain::services::position_tracker::PositionTracker::snapshot(self).await
    }
    async fn add_position(&self, position: Position) {
        crate::domain::services::position_tracker::PositionTracker::add_position(self, position).await
    }
    async fn remove_position(&self, symbol: &str) {
        crate::domain::services::position_tracker::PositionTracker::remove_position(self, symbol).await
    }
    async fn update_position(&self, symbol: &str, current_price: Option<Decimal>, quantity_delta: Option<Decimal>) {
        crate::domain::services::position_tracker::PositionTracker::update_position(self, symbol, current_price, quantity_delta).await
    }
}

#[async_trait]
pub trait TradeExchange: Send + Sync {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, TradingError>;
    async fn exchange_rules(&self) -> Result<std::collections::HashMap<String, crate::domain::entities::ExchangeRules>, TradingError>;
    async fn usdt_balance(&self) -> Result<Decimal, TradingError>;
    async fn place_market_buy(&self, symbol: &str, quantity: Decimal) -> Result<OrderAck, TradingError>;
    async fn place_limit_buy(&self, symbol: &str, quantity: Decimal, price: Decimal) -> Result<OrderAck, TradingError>;
    async fn place_market_sell(&self, symbol: &str, quantity: Decimal) -> Result<OrderAck, TradingError>;
    async fn place_limit_sell(&self, symbol: &str, quantity: Decimal, price: Decimal) -> Result<OrderAck, TradingError>;
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BuyResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub executed_price: Option<Decimal>,
    pub executed_quantity: Option<Decimal>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SellResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub executed_price: Option<Decimal>,
    pub executed_quantity: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub error: Option<String>,
}

fn bps_multiplier(bps: i64, sign: i64) -> Decimal {
    let numerator = 10_000 + sign * bps;
    Decimal::from_str(&numerator.to_string())
        .unwrap_or(Decimal::ZERO)
        .checked_div(Decimal::from_str("10000").unwrap())
        .unwrap_or(Decimal::ZERO)
}

pub struct TradeExecutor {
    exchange: Arc<dyn TradeExchange>,
    rules_cache: Arc<RulesCache>,
    safety: Arc<dyn SafetyGate>,
    risk: Arc<RiskManager>,
    positions: Arc<dyn PositionStore>,
    config_source: Arc<dyn ConfigSource>,
    attempts: Arc<dyn TradeAttemptStore>,
    submission_limiter: crate::rate_limit::GlobalRateLimiter,
}

impl TradeExecutor {
    pub fn new(
        exchange: Arc<dyn TradeExchange>,
        rules_cache: Arc<RulesCache>,
        safety: Arc<dyn SafetyGate>,
        risk: Arc<RiskManager>,
        positions: Arc<dyn PositionStore>,
        config_source: Arc<dyn ConfigSource>,
        attempts: Arc<dyn TradeAttemptStore>,
        submission_limiter: crate::rate_limit::GlobalRateLimiter,
    ) -> Self {
        TradeExecutor {
            exchange,
            rules_cache,
            safety,
            risk,
            positions,
            config_source,
            attempts,
            submission_limiter,
        }
    }

    /// §4.10 `executeTrade`. `bypass_enabled_pairs` is set for manual trades.
    pub async fn execute_trade(&self, symbol: &str, order_type: OrderType, bypass_enabled_pairs: bool) -> BuyResult {
        match self.execute_trade_inner(symbol, order_type, bypass_enabled_pairs).await {
            Ok(result) => result,
            Err(err) => BuyResult {
                success: false,
                order_id: None,
                executed_price: None,
                executed_quantity: None,
                error: Some(err.to_string()),
            },
        }
    }

    async fn execute_trade_inner(&self, symbol: &str, order_type: OrderType, bypass_enabled_pairs: bool) -> Result<BuyResult, TradingError> {
        let config = self
            .config_source
            .active_configuration()
            .await?
            .ok_or_else(|| TradingError::Validation("NO_CONFIGURATION_FOUND".to_string()))?;

        if !bypass_enabled_pairs && !config.enabled_pairs.contains(symbol) {
            return Err(TradingError::Validation("NO_CONFIGURATION_FOUND".to_string()));
        }

        let ten = Decimal::from_str("10").unwrap();
        let tenth = config
            .max_purchase_amount
            .checked_mul(Decimal::from_str("0.1").unwrap())
            .unwrap_or(Decimal::ZERO);
        let trade_usd = if tenth < ten { tenth } else { ten };

        let price = self.exchange.ticker_price(symbol).await?;
        if !price.is_positive() {
            return Err(TradingError::Validation("INVALID_PRICE".to_string()));
        }
        let quantity = trade_usd.checked_div(price).ok_or_else(|| TradingError::Validation("INVALID_PRICE".to_string()))?;

        if self.submission_limiter.check().is_err() {
            return Err(TradingError::Safety("TRADE_SUBMISSION_RATE_LIMITED".to_string()));
        }

        let safety = self
            .safety
            .check(
                trade_usd,
                &SafetyLimits {
                    max_trades_per_hour: config.max_trades_per_hour,
                    daily_spending_limit: config.daily_spending_limit,
                },
            )
            .await;
        if !safety.can_trade {
            return Err(TradingError::Safety(safety.reason.unwrap_or_default()));
        }

        let rules = self
            .rules_cache
            .get_or_refresh(symbol, || async { self.exchange.exchange_rules().await })
            .await?;
        let validation = order_validator::validate(Some(&rules), quantity, price);
        if !validation.valid {
            return Err(TradingError::Validation(validation.errors.join(",")));
        }

        let stop_loss = price.checked_mul(bps_multiplier(config.stop_loss_bps, -1));
        let portfolio_value = self.exchange.usdt_balance().await.unwrap_or(Decimal::ZERO);
        let decision = self
            .risk
            .validate_order(&OrderRiskRequest {
                symbol: symbol.to_string(),
                quantity,
                price,
                side: TradeSide::Buy,
                stop_loss,
                portfolio_value,
            })
            .await;
        if !decision.approved {
            return Err(TradingError::Risk(decision.reason.unwrap_or_default()));
        }
        let final_quantity = decision.adjusted_quantity.unwrap_or(quantity);

        let mut attempt = TradeAttempt {
            id: Uuid::new_v4(),
            listing_event_id: None,
            configuration_id: config.id,
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            order_type,
            quantity: final_quantity,
            price: Some(price),
            status: TradeStatus::Pending,
            order_id: None,
            executed_quantity: None,
            executed_price: None,
            commission: None,
            detected_at: Some(Utc::now()),
            submitted_at: None,
            completed_at: None,
            latency_ms: None,
            error_code: None,
            error_message: None,
            retry_count: 0,
            parent_trade_id: None,
            position_id: None,
            sell_reason: None,
            configuration_snapshot: serde_json::json!({ "symbol": symbol }),
        };
        self.attempts.create_pending(&attempt).await?;
        attempt.mark_submitted(Utc::now());

        let submission = match order_type {
            OrderType::Market => self.exchange.place_market_buy(symbol, final_quantity).await,
            OrderType::Limit => {
                let limit_price = price.checked_mul(Decimal::from_str("1.01").unwrap()).unwrap_or(price);
                self.exchange.place_limit_buy(symbol, final_quantity, limit_price).await
            }
        };

        match submission {
            Ok(ack) => {
                let completed_at = Utc::now();
                self.attempts.mark_success(&attempt, &ack, attempt.submitted_at.unwrap_or(completed_at), completed_at).await?;
                let position = Position::open(attempt.id, symbol.to_string(), ack.executed_quantity, ack.executed_price, completed_at, ack.order_id.clone());
                self.positions.add_position(position).await;
                self.risk.record_trade(Decimal::ZERO).await;
                info!(symbol, order_id = %ack.order_id, "buy executed");
                Ok(BuyResult {
                    success: true,
                    order_id: Some(ack.order_id),
                    executed_price: Some(ack.executed_price),
                    executed_quantity: Some(ack.executed_quantity),
                    error: None,
                })
            }
            Err(err) => {
                let completed_at = Utc::now();
                self.attempts.mark_failed(&attempt, err.code(), &err.to_string(), completed_at).await?;
                warn!(symbol, error = %err, "buy failed");
                Ok(BuyResult {
                    success: false,
                    order_id: None,
                    executed_price: None,
                    executed_quantity: None,
                    error: Some(err.to_string()),
                })
            }
        }
    }

    /// §4.10 `executeSellTrade`.
    pub async fn execute_sell_trade(
        &self,
        symbol: &str,
        quantity: Decimal,
        order_type: OrderType,
        sell_reason: Option<String>,
        parent_trade_id: Option<Uuid>,
    ) -> SellResult {
        match self
            .execute_sell_trade_inner(symbol, quantity, order_type, sell_reason, parent_trade_id)
            .await
        {
            Ok(result) => result,
            Err(err) => SellResult {
                success: false,
                order_id: None,
                executed_price: None,
                executed_quantity: None,
                realized_pnl: None,
                error: Some(err.to_string()),
            },
        }
    }

    async fn execute_sell_trade_inner(
        &self,
        symbol: &str,
        quantity: Decimal,
        order_type: OrderType,
        sell_reason: Option<String>,
        parent_trade_id: Option<Uuid>,
    ) -> Result<SellResult, TradingError> {
        let position = self
            .positions
            .get(symbol)
            .await
            .ok_or_else(|| TradingError::Validation("NO_POSITION".to_string()))?;
        if quantity > position.quantity {
            return Err(TradingError::Validation("INSUFFICIENT_QUANTITY".to_string()));
        }

        let (listing_event_id, configuration_id, resolved_parent) = match parent_trade_id {
            Some(id) => {
                let parent = self.attempts.get(id).await?;
                (
                    parent.as_ref().and_then(|p| p.listing_event_id),
                    parent.as_ref().map(|p| p.configuration_id),
                    Some(id),
                )
            }
            None => {
                let parent = self.attempts.get(position.trade_attempt_id).await?;
                (
                    parent.as_ref().and_then(|p| p.listing_event_id),
                    parent.as_ref().map(|p| p.configuration_id),
                    Some(position.trade_attempt_id),
                )
            }
        };
        let configuration_id = configuration_id.ok_or_else(|| TradingError::Internal("orphaned position: no parent buy found".to_string()))?;

        let price = self.exchange.ticker_price(symbol).await.ok();

        let mut attempt = TradeAttempt {
            id: Uuid::new_v4(),
            listing_event_id,
            configuration_id,
            symbol: symbol.to_string(),
            side: TradeSide::Sell,
            order_type,
            quantity,
            price,
            status: TradeStatus::Pending,
            order_id: None,
            executed_quantity: None,
            executed_price: None,
            commission: None,
            detected_at: Some(Utc::now()),
            submitted_at: None,
            completed_at: None,
            latency_ms: None,
            error_code: None,
            error_message: None,
            retry_count: 0,
            parent_trade_id: resolved_parent,
            position_id: resolved_parent,
            sell_reason: sell_reason.clone(),
            configuration_snapshot: serde_json::json!({ "symbol": symbol }),
        };
        self.attempts.create_pending(&attempt).await?;
        attempt.mark_submitted(Utc::now());

        let submission = match order_type {
            OrderType::Market => self.exchange.place_market_sell(symbol, quantity).await,
            OrderType::Limit => {
                let limit_price = price
                    .unwrap_or(position.current_price)
                    .checked_mul(Decimal::from_str("0.99").unwrap())
                    .unwrap_or(position.current_price);
                self.exchange.place_limit_sell(symbol, quantity, limit_price).await
            }
        };

        match submission {
            Ok(ack) => {
                let completed_at = Utc::now();
                let realized_pnl = ack
                    .executed_price
                    .checked_sub(position.entry_price)
                    .and_then(|delta| delta.checked_mul(ack.executed_quantity))
                    .unwrap_or(Decimal::ZERO);

                self.attempts.mark_success(&attempt, &ack, attempt.submitted_at.unwrap_or(completed_at), completed_at).await?;

                if ack.executed_quantity >= position.quantity {
                    self.positions.remove_position(symbol).await;
                } else {
                    let remaining_delta = ack.executed_quantity.checked_mul(Decimal::from_str("-1").unwrap());
                    self.positions.update_position(symbol, None, remaining_delta).await;
                }
                self.risk.record_trade(realized_pnl).await;

                info!(symbol, order_id = %ack.order_id, realized_pnl = %realized_pnl, "sell executed");
                Ok(SellResult {
                    success: true,
                    order_id: Some(ack.order_id),
                    executed_price: Some(ack.executed_price),
                    executed_quantity: Some(ack.executed_quantity),
                    realized_pnl: Some(realized_pnl),
                    error: None,
                })
            }
            Err(err) => {
                let completed_at = Utc::now();
                self.attempts.mark_failed(&attempt, err.code(), &err.to_string(), completed_at).await?;
                warn!(symbol, error = %err, "sell failed");
                Ok(SellResult {
                    success: false,
                    order_id: None,
                    executed_price: None,
                    executed_quantity: None,
                    realized_pnl: None,
                    error: Some(err.to_string()),
                })
            }
        }
    }
}
