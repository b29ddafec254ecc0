//! Exchange Rules Cache (C2) — per-symbol trading filters with a TTL
//! refresh and an atomic full-table swap, the same "rebuild wholesale,
//! never half-fill" shape the teacher's `symbol_screening.rs` TTL cache
//! uses.

use crate::domain::entities::ExchangeRules;
use crate::error::TradingError;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

const TTL_SECONDS: i64 = 3600;

pub struct RulesCache {
    rules: Arc<RwLock<HashMap<String, ExchangeRules>>>,
}

impl Default for RulesCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesCache {
    pub fn new() -> Self {
        RulesCache {
            rules: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns a cached, non-stale entry, or `None` on miss/staleness —
    /// callers decide whether a miss warrants a refresh.
    pub async fn get(&self, symbol: &str) -> Option<ExchangeRules> {
        let guard = self.rules.read().await;
        let entry = guard.get(symbol)?;
        if entry.is_stale(Utc::now(), chrono::Duration::seconds(TTL_SECONDS)) {
            None
        } else {
            Some(entry.clone())
        }
    }

    /// Returns the cached entry for `symbol` if fresh, otherwise calls
    /// `fetch_all` to pull the whole exchange-info table and swaps the
    /// cache in one shot so readers never observe a half-filled map.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        symbol: &str,
        fetch_all: F,
    ) -> Result<ExchangeRules, TradingError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<HashMap<String, ExchangeRules>, TradingError>>,
    {
        if let Some(rules) = self.get(symbol).await {
            return Ok(rules);
        }

        debug!(symbol, "rules cache miss or stale, refreshing from exchange info");
        let fresh = fetch_all().await?;
        let found = fresh.get(symbol).cloned();
        *self.rules.write().await = fresh;

        found.ok_or_else(|| TradingError::Validation(format!("RULES_UNKNOWN: {symbol}")))
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Decimal;
    use crate::domain::entities::RuleStatus;
    use std::str::FromStr;

    fn rules(symbol: &str, cached_at: chrono::DateTime<Utc>) -> ExchangeRules {
        ExchangeRules {
            symbol: symbol.to_string(),
            min_qty: Decimal::from_str("1").unwrap(),
            max_qty: Decimal::from_str("1000000").unwrap(),
            step_size: Decimal::from_str("0.01").unwrap(),
            min_notional: Decimal::from_str("5").unwrap(),
            tick_size: Decimal::from_str("0.0001").unwrap(),
            status: RuleStatus::Enabled,
            cached_at,
        }
    }

    #[tokio::test]
    async fn miss_triggers_refresh_and_populates_cache() {
        let cache = RulesCache::new();
        let result = cache
            .get_or_refresh("FOOUSDT", || async {
                let mut map = HashMap::new();
                map.insert("FOOUSDT".to_string(), rules("FOOUSDT", Utc::now()));
                Ok(map)
            })
            .await
            .unwrap();
        assert_eq!(result.symbol, "FOOUSDT");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn stale_entry_forces_a_refresh() {
        let cache = RulesCache::new();
        let stale_at = Utc::now() - chrono::Duration::seconds(TTL_SECONDS + 1);
        cache
            .rules
            .write()
            .await
            .insert("FOOUSDT".to_string(), rules("FOOUSDT", stale_at));

        let refreshed = cache
            .get_or_refresh("FOOUSDT", || async {
                let mut map = HashMap::new();
                map.insert("FOOUSDT".to_string(), rules("FOOUSDT", Utc::now()));
                Ok(map)
            })
            .await
            .unwrap();
        assert!(!refreshed.is_stale(Utc::now(), chrono::Duration::seconds(TTL_SECONDS)));
    }

    #[tokio::test]
    async fn symbol_missing_from_refresh_is_rules_unknown() {
        let cache = RulesCache::new();
        let result = cache.get_or_refresh("BARUSDT", || async { Ok(HashMap::new()) }).await;
        assert!(matches!(result, Err(TradingError::Validation(_))));
    }
}
