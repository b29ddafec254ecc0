//! Safety Checker (C5) — hourly trade-count and daily-spend caps sourced
//! from the persistent trade log. Fails closed: any read error on the
//! activity source blocks trading rather than allowing it.

use crate::decimal::Decimal;
use crate::error::TradingError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::error;

#[async_trait]
pub trait TradeActivitySource: Send + Sync {
    async fn trades_submitted_since(&self, since: DateTime<Utc>) -> Result<i64, TradingError>;
    async fn quote_spent_since(&self, since: DateTime<Utc>) -> Result<Decimal, TradingError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SafetyLimits {
    pub max_trades_per_hour: u32,
    pub daily_spending_limit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyCheckResult {
    pub can_trade: bool,
    pub reason: Option<String>,
    pub trades_this_hour: i64,
    pub spent_today: Decimal,
}

pub struct SafetyChecker<S: TradeActivitySource> {
    source: Arc<S>,
}

impl<S: TradeActivitySource> SafetyChecker<S> {
    pub fn new(source: Arc<S>) -> Self {
        SafetyChecker { source }
    }

    pub async fn check(&self, quote_amount: Decimal, limits: &SafetyLimits) -> SafetyCheckResult {
        let now = Utc::now();
        let hour_ago = now - chrono::Duration::hours(1);
        let start_of_day = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time")
            .and_utc();

        let trades_this_hour = match self.source.trades_submitted_since(hour_ago).await {
            Ok(count) => count,
            Err(err) => {
                error!(error = %err, "safety check: failed to read trade count");
                return SafetyCheckResult {
                    can_trade: false,
                    reason: Some("SAFETY_CHECK_ERROR".to_string()),
                    trades_this_hour: 0,
                    spent_today: Decimal::ZERO,
                };
            }
        };

        let spent_today = match self.source.quote_spent_since(start_of_day).await {
            Ok(amount) => amount,
            Err(err) => {
                error!(error = %err, "safety check: failed to read daily spend");
                return SafetyCheckResult {
                    can_trade: false,
                    reason: Some("SAFETY_CHECK_ERROR".to_string()),
                    trades_this_hour,
                    spent_today: Decimal::ZERO,
                };
            }
        };

        if trades_this_hour as u64 >= limits.max_trades_per_hour as u64 {
            return SafetyCheckResult {
                can_trade: false,
                reason: Some("HOURLY_TRADE_LIMIT".to_string()),
                trades_this_hour,
                spent_today,
            };
        }

        let projected = spent_today.checked_add(quote_amount).unwrap_or(spent_today);
        if projected >= limits.daily_spending_limit {
            return SafetyCheckResult {
                can_trade: false,
                reason: Some("DAILY_SPEND_LIMIT".to_string()),
                trades_this_hour,
                spent_today,
            };
        }

        SafetyCheckResult {
            can_trade: true,
            reason: None,
            trades_this_hour,
            spent_today,
        }
    }
}
