//! TradingConfiguration (spec §3) — the operator's parameter set.
//!
//! Mirrors the validated-struct style of the teacher's `TradingConfig`
//! (`config.rs`) but scoped to a single exchange and carrying the full
//! sell-strategy machinery §4.9 needs instead of ad hoc per-exchange
//! symbol lists.

use crate::decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SellStrategy {
    ProfitTarget,
    StopLoss,
    TimeBased,
    TrailingStop,
    Combined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfiguration {
    pub id: Uuid,
    pub operator_id: Uuid,
    pub enabled_pairs: HashSet<String>,
    pub max_purchase_amount: Decimal,
    pub price_tolerance_bps: i64,
    pub daily_spending_limit: Decimal,
    pub max_trades_per_hour: u32,
    pub polling_interval_ms: u64,
    pub order_timeout_ms: u64,
    pub recv_window_ms: u64,
    pub profit_target_bps: i64,
    pub stop_loss_bps: i64,
    pub time_based_exit_minutes: i64,
    pub trailing_stop_bps: Option<i64>,
    pub sell_strategy: SellStrategy,
    pub safety_enabled: bool,
    pub is_active: bool,
}

impl TradingConfiguration {
    pub fn default_for(operator_id: Uuid) -> Self {
        TradingConfiguration {
            id: Uuid::new_v4(),
            operator_id,
            enabled_pairs: HashSet::new(),
            max_purchase_amount: Decimal::from_f64(100.0).unwrap(),
            price_tolerance_bps: 50,
            daily_spending_limit: Decimal::from_f64(500.0).unwrap(),
            max_trades_per_hour: 10,
            polling_interval_ms: 5_000,
            order_timeout_ms: 10_000,
            recv_window_ms: 5_000,
            profit_target_bps: 500,
            stop_loss_bps: 200,
            time_based_exit_minutes: 60,
            trailing_stop_bps: None,
            sell_strategy: SellStrategy::Combined,
            safety_enabled: true,
            is_active: false,
        }
    }

    /// §9 open question: TRAILING_STOP is declared but must never fire.
    /// Reject it at config-validation time instead of silently ignoring it.
    pub fn validate(&self) -> Result<(), String> {
        if matches!(self.sell_strategy, SellStrategy::TrailingStop) {
            return Err(
                "TRAILING_STOP sell strategy is not implemented (watermark semantics are an open question)"
                    .to_string(),
            );
        }
        if self.max_trades_per_hour == 0 {
            return Err("maxTradesPerHour must be positive".to_string());
        }
        if self.polling_interval_ms == 0 {
            return Err("pollingInterval must be positive".to_string());
        }
        Ok(())
    }
}
