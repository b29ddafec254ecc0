//! Position (spec §3, §4.8) — an open or closed holding resulting from a
//! successful buy.

use crate::decimal::Decimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub trade_attempt_id: Uuid,
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_percent: Decimal,
    pub buy_order_id: String,
    pub closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn open(
        trade_attempt_id: Uuid,
        symbol: String,
        quantity: Decimal,
        entry_price: Decimal,
        entry_time: DateTime<Utc>,
        buy_order_id: String,
    ) -> Self {
        Position {
            id: Uuid::new_v4(),
            trade_attempt_id,
            symbol,
            quantity,
            entry_price,
            entry_time,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_percent: Decimal::ZERO,
            buy_order_id,
            closed: false,
            closed_at: None,
        }
    }

    /// Recomputes unrealized P&L against a fresh ticker price (§4.8).
    pub fn reprice(&mut self, current_price: Decimal) {
        self.current_price = current_price;
        let Some(delta) = current_price.checked_sub(self.entry_price) else {
            return;
        };
        if let Some(pnl) = delta.checked_mul(self.quantity) {
            self.unrealized_pnl = pnl;
        }
        if let Some(ratio) = delta.checked_div(self.entry_price) {
            self.unrealized_pnl_percent = ratio.checked_mul(Decimal::from(100u32)).unwrap_or(Decimal::ZERO);
        }
    }

    pub fn close(&mut self, now: DateTime<Utc>) {
        self.closed = true;
        self.closed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reprice_computes_positive_pnl() {
        let mut position = Position::open(
            Uuid::new_v4(),
            "FOOUSDT".to_string(),
            Decimal::from_f64(10.0).unwrap(),
            Decimal::from_f64(1.0).unwrap(),
            Utc::now(),
            "ex-1".to_string(),
        );
        position.reprice(Decimal::from_f64(1.1).unwrap());
        assert!(position.unrealized_pnl.is_positive());
    }

    #[test]
    fn close_marks_closed_with_timestamp() {
        let mut position = Position::open(
            Uuid::new_v4(),
            "FOOUSDT".to_string(),
            Decimal::from_f64(10.0).unwrap(),
            Decimal::from_f64(1.0).unwrap(),
            Utc::now(),
            "ex-1".to_string(),
        );
        let now = Utc::now();
        position.close(now);
        assert!(position.closed);
        assert_eq!(position.closed_at, Some(now));
    }
}
