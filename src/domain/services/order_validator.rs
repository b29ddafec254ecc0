//! Order Validator (C3) — enforces per-symbol quantity/price/notional
//! rules before an order reaches the exchange.

use crate::decimal::Decimal;
use crate::domain::entities::ExchangeRules;
use std::str::FromStr;

fn tolerance() -> Decimal {
    Decimal::from_str("0.000000001").unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Checks every rule and accumulates violations instead of short-circuiting
/// on the first one, so a caller can surface the full list to an operator.
pub fn validate(rules: Option<&ExchangeRules>, qty: Decimal, price: Decimal) -> ValidationResult {
    let Some(rules) = rules else {
        return ValidationResult {
            valid: false,
            errors: vec!["RULES_UNKNOWN".to_string()],
        };
    };

    let mut errors = Vec::new();

    if !rules.is_tradeable() {
        errors.push("SYMBOL_DISABLED".to_string());
    }
    if qty < rules.min_qty || qty > rules.max_qty {
        errors.push("QTY_OUT_OF_RANGE".to_string());
    }
    if !qty.is_multiple_of(rules.step_size, tolerance()) {
        errors.push("QTY_STEP_SIZE".to_string());
    }
    if !price.is_multiple_of(rules.tick_size, tolerance()) {
        errors.push("PRICE_TICK_SIZE".to_string());
    }
    match qty.checked_mul(price) {
        Some(notional) if notional >= rules.min_notional => {}
        _ => errors.push("MIN_NOTIONAL".to_string()),
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

/// Rounds `price` down to the nearest tick on the symbol's grid.
pub fn adjust_price(rules: &ExchangeRules, price: Decimal) -> Decimal {
    price.floor_to_step(rules.tick_size)
}
