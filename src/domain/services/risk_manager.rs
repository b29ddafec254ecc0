//! Risk Manager (C4) — position-size caps, daily-loss caps, the
//! stop-loss requirement, Kelly sizing, and a process-local PnL ledger.
//!
//! Grounded on the teacher's position-sizing services: the sizing and
//! leverage math follow the same cap-then-approve shape, generalized
//! here into a single gate the trade executor calls before every order.

use crate::decimal::Decimal;
use crate::domain::entities::TradeSide;
use std::str::FromStr;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct RiskConfig {
    pub max_position_size_percent: Decimal,
    pub max_daily_loss_percent: Decimal,
    pub max_leverage: Decimal,
    pub require_stop_loss: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            max_position_size_percent: Decimal::from_str("0.02").unwrap(),
            max_daily_loss_percent: Decimal::from_str("0.05").unwrap(),
            max_leverage: Decimal::from_str("2").unwrap(),
            require_stop_loss: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRiskRequest {
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub side: TradeSide,
    pub stop_loss: Option<Decimal>,
    pub portfolio_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskDecision {
    pub approved: bool,
    pub adjusted_quantity: Option<Decimal>,
    pub reason: Option<String>,
    pub max_loss: Option<Decimal>,
}

pub struct RiskManager {
    config: RiskConfig,
    daily_pnl: Mutex<Decimal>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        RiskManager {
            config,
            daily_pnl: Mutex::new(Decimal::ZERO),
        }
    }

    pub async fn daily_pnl(&self) -> Decimal {
        *self.daily_pnl.lock().await
    }

    pub async fn record_trade(&self, realized_pnl: Decimal) {
        let mut pnl = self.daily_pnl.lock().await;
        *pnl = pnl.checked_add(realized_pnl).unwrap_or(*pnl);
    }

    pub async fn reset_daily_pnl(&self) {
        *self.daily_pnl.lock().await = Decimal::ZERO;
    }

    /// §4.4 decision order: daily-loss gate, then position-size cap, then
    /// the stop-loss requirement for buys.
    pub async fn validate_order(&self, req: &OrderRiskRequest) -> RiskDecision {
        let daily_pnl = self.daily_pnl().await;

        if req.portfolio_value.is_positive() {
            if let Some(loss_ratio) = daily_pnl.abs().checked_div(req.portfolio_value) {
                if loss_ratio >= self.config.max_daily_loss_percent {
                    return RiskDecision {
                        approved: false,
                        adjusted_quantity: None,
                        reason: Some("DAILY_LOSS_LIMIT".to_string()),
                        max_loss: None,
                    };
                }
            }
        }

        let notional = req.quantity.checked_mul(req.price).unwrap_or(Decimal::ZERO);
        let mut adjusted_quantity = None;
        if req.portfolio_value.is_positive() {
            if let Some(position_ratio) = notional.checked_div(req.portfolio_value) {
                if position_ratio > self.config.max_position_size_percent {
                    let cap_notional = req
                        .portfolio_value
                        .checked_mul(self.config.max_position_size_percent)
                        .unwrap_or(Decimal::ZERO);
                    let capped_qty = cap_notional.checked_div(req.price).unwrap_or(Decimal::ZERO);
                    let floored = capped_qty.floor_to_step(Decimal::from_str("0.00000001").unwrap());
                    if !floored.is_positive() {
                        return RiskDecision {
                            approved: false,
                            adjusted_quantity: Some(floored),
                            reason: Some("POSITION_SIZE_ADJUSTED".to_string()),
                            max_loss: None,
                        };
                    }
                    adjusted_quantity = Some(floored);
                }
            }
        }

        if matches!(req.side, TradeSide::Buy) && self.config.require_stop_loss && req.stop_loss.is_none() {
            return RiskDecision {
                approved: false,
                adjusted_quantity: None,
                reason: Some("STOP_LOSS_REQUIRED".to_string()),
                max_loss: None,
            };
        }

        let effective_qty = adjusted_quantity.unwrap_or(req.quantity);
        let max_loss = match req.stop_loss {
            Some(stop) => effective_qty.checked_mul(req.price.abs().checked_sub(stop).unwrap_or(Decimal::ZERO).abs()),
            None => effective_qty.checked_mul(req.price),
        };

        RiskDecision {
            approved: true,
            adjusted_quantity,
            reason: adjusted_quantity.map(|_| "POSITION_SIZE_ADJUSTED".to_string()),
            max_loss,
        }
    }

    /// Kelly-criterion position size, the fraction capped at the
    /// configured max position size.
    pub fn calculate_kelly_position(
        &self,
        win_rate: f64,
        reward_to_risk: f64,
        balance: Decimal,
        entry: Decimal,
        stop: Decimal,
    ) -> Result<Decimal, String> {
        if !(0.0..=1.0).contains(&win_rate) {
            return Err("INVALID_PARAMS: winRate must be in [0, 1]".to_string());
        }
        if reward_to_risk <= 0.0 {
            return Err("INVALID_PARAMS: reward/risk ratio must be positive".to_string());
        }
        if entry <= stop {
            return Err("INVALID_PARAMS: entry must be above stop".to_string());
        }

        let kelly_fraction = win_rate - (1.0 - win_rate) / reward_to_risk;
        let cap = self.config.max_position_size_percent.to_f64();
        let capped_fraction = kelly_fraction.max(0.0).min(cap);

        let risk_per_unit = entry.checked_sub(stop).ok_or("INVALID_PARAMS: bad entry/stop")?;
        let risk_budget = balance
            .checked_mul(Decimal::from_f64(capped_fraction).ok_or("INVALID_PARAMS: fraction overflow")?)
            .ok_or("INVALID_PARAMS: balance overflow")?;
        risk_budget
            .checked_div(risk_per_unit)
            .ok_or_else(|| "INVALID_PARAMS: risk per unit is zero".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(qty: &str, price: &str, portfolio: &str, stop: Option<&str>) -> OrderRiskRequest {
        OrderRiskRequest {
            symbol: "FOOUSDT".to_string(),
            quantity: Decimal::from_str(qty).unwrap(),
            price: Decimal::from_str(price).unwrap(),
            side: TradeSide::Buy,
            stop_loss: stop.map(|s| Decimal::from_str(s).unwrap()),
            portfolio_value: Decimal::from_str(portfolio).unwrap(),
        }
    }

    #[tokio::test]
    async fn daily_loss_limit_rejects_regardless_of_size() {
        let manager = RiskManager::new(RiskConfig::default());
        manager.record_trade(Decimal::from_str("-600").unwrap()).await;
        let decision = manager.validate_order(&req("1", "1", "10000", Some("0.5"))).await;
        assert!(!decision.approved);
        assert_eq!(decision.reason.as_deref(), Some("DAILY_LOSS_LIMIT"));
    }

    #[tokio::test]
    async fn oversized_order_is_adjusted_down() {
        let manager = RiskManager::new(RiskConfig::default());
        let decision = manager.validate_order(&req("1", "45000", "10000", Some("44000"))).await;
        assert!(!decision.approved);
        assert_eq!(decision.reason.as_deref(), Some("POSITION_SIZE_ADJUSTED"));
        assert_eq!(decision.adjusted_quantity, Some(Decimal::ZERO));
    }

    #[tokio::test]
    async fn buy_without_stop_loss_is_rejected() {
        let manager = RiskManager::new(RiskConfig::default());
        let decision = manager.validate_order(&req("0.01", "100", "10000", None)).await;
        assert!(!decision.approved);
        assert_eq!(decision.reason.as_deref(), Some("STOP_LOSS_REQUIRED"));
    }

    #[tokio::test]
    async fn well_formed_order_is_approved() {
        let manager = RiskManager::new(RiskConfig::default());
        let decision = manager.validate_order(&req("0.01", "100", "10000", Some("95"))).await;
        assert!(decision.approved);
        assert!(decision.adjusted_quantity.is_none());
    }

    #[test]
    fn kelly_rejects_out_of_range_win_rate() {
        let manager = RiskManager::new(RiskConfig::default());
        let result = manager.calculate_kelly_position(
            1.5,
            2.0,
            Decimal::from_str("10000").unwrap(),
            Decimal::from_str("100").unwrap(),
            Decimal::from_str("95").unwrap(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn kelly_caps_at_max_position_size() {
        let manager = RiskManager::new(RiskConfig::default());
        let qty = manager
            .calculate_kelly_position(
                0.9,
                5.0,
                Decimal::from_str("10000").unwrap(),
                Decimal::from_str("100").unwrap(),
                Decimal::from_str("95").unwrap(),
            )
            .unwrap();
        // capped fraction 0.02 * 10000 = 200 risk budget / 5 risk-per-unit = 40
        assert_eq!(qty.to_string(), "40");
    }
}
