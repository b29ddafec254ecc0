//! ExchangeRules (spec §3, §4.2/§4.3) — the per-symbol trading filters
//! cached from MEXC's exchange-info endpoint.

use crate::decimal::Decimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRules {
    pub symbol: String,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
    pub min_notional: Decimal,
    pub tick_size: Decimal,
    pub status: RuleStatus,
    pub cached_at: DateTime<Utc>,
}

impl ExchangeRules {
    pub fn is_tradeable(&self) -> bool {
        matches!(self.status, RuleStatus::Enabled)
    }

    /// §4.2: a cache entry older than `ttl` must be treated as a miss.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.cached_at > ttl
    }
}
