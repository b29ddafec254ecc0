//! TradeAttempt / TradeLog (spec §3, §4.10) — the record of one order
//! lifecycle, from detection to fill or failure.

use crate::decimal::Decimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Pending,
    Success,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeAttempt {
    pub id: Uuid,
    pub listing_event_id: Option<Uuid>,
    pub configuration_id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub status: TradeStatus,
    pub order_id: Option<String>,
    pub executed_quantity: Option<Decimal>,
    pub executed_price: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub detected_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub parent_trade_id: Option<Uuid>,
    pub position_id: Option<Uuid>,
    pub sell_reason: Option<String>,
    pub configuration_snapshot: serde_json::Value,
}

impl TradeAttempt {
    pub fn mark_submitted(&mut self, now: DateTime<Utc>) {
        self.submitted_at = Some(now);
        if let Some(detected) = self.detected_at {
            self.latency_ms = Some((now - detected).num_milliseconds());
        }
    }

    pub fn mark_success(
        &mut self,
        now: DateTime<Utc>,
        order_id: String,
        executed_quantity: Decimal,
        executed_price: Decimal,
        commission: Decimal,
    ) {
        self.status = TradeStatus::Success;
        self.completed_at = Some(now);
        self.order_id = Some(order_id);
        self.executed_quantity = Some(executed_quantity);
        self.executed_price = Some(executed_price);
        self.commission = Some(commission);
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, code: &str, message: String) {
        self.status = TradeStatus::Failed;
        self.completed_at = Some(now);
        self.error_code = Some(code.to_string());
        self.error_message = Some(message);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLog {
    pub id: Uuid,
    pub trade_attempt_id: Uuid,
    pub raw_exchange_response: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}
