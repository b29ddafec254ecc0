//! Position Tracker (C8) — the authoritative in-memory view of open
//! positions, rebuilt from the trade log and exchange balances on a
//! 5-second TTL, with explicit add/remove/update operations that bypass
//! the TTL for the hot path the trade executor drives.

use crate::decimal::Decimal;
use crate::domain::entities::{Position, TradeAttempt};
use crate::error::TradingError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

const TTL_SECONDS: i64 = 5;
const QUOTE_SUFFIXES: &[&str] = &["USDT", "USDC", "BTC", "ETH", "BNB"];

#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn success_buys_desc(&self) -> Result<Vec<TradeAttempt>, TradingError>;
    async fn free_balances(&self) -> Result<HashMap<String, Decimal>, TradingError>;
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, TradingError>;
}

/// Strips a known quote suffix from `symbol`, returning the base asset.
pub fn base_asset(symbol: &str) -> Option<&str> {
    QUOTE_SUFFIXES
        .iter()
        .find(|suffix| symbol.ends_with(*suffix))
        .map(|suffix| &symbol[..symbol.len() - suffix.len()])
}

pub struct PositionTracker<S: PositionSource> {
    source: Arc<S>,
    positions: Mutex<HashMap<String, Position>>,
    last_rebuild: Mutex<Option<DateTime<Utc>>>,
}

impl<S: PositionSource> PositionTracker<S> {
    pub fn new(source: Arc<S>) -> Self {
        PositionTracker {
            source,
            positions: Mutex::new(HashMap::new()),
            last_rebuild: Mutex::new(None),
        }
    }

    pub async fn get(&self, symbol: &str) -> Option<Position> {
        self.rebuild_if_stale().await;
        self.positions.lock().await.get(symbol).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Position> {
        self.rebuild_if_stale().await;
        self.positions.lock().await.values().cloned().collect()
    }

    /// Bypasses the TTL: the trade executor calls this right after a
    /// successful buy so the position is visible before the next tick.
    /// Marks the snapshot fresh so a concurrent `get`/`snapshot` doesn't
    /// immediately discard it via a stale-triggered rebuild.
    pub async fn add_position(&self, position: Position) {
        self.positions.lock().await.insert(position.symbol.clone(), position);
        self.mark_fresh().await;
    }

    pub async fn remove_position(&self, symbol: &str) {
        self.positions.lock().await.remove(symbol);
        self.mark_fresh().await;
    }

    pub async fn update_position(&self, symbol: &str, current_price: Option<Decimal>, quantity_delta: Option<Decimal>) {
        {
            let mut positions = self.positions.lock().await;
            if let Some(position) = positions.get_mut(symbol) {
                if let Some(price) = current_price {
                    position.reprice(price);
                }
                if let Some(delta) = quantity_delta {
                    if let Some(new_qty) = position.quantity.checked_add(delta) {
                        position.quantity = new_qty;
                    }
                }
            }
        }
        self.mark_fresh().await;
    }

    async fn mark_fresh(&self) {
        *self.last_rebuild.lock().await = Some(Utc::now());
    }

    async fn rebuild_if_stale(&self) {
        let needs_rebuild = {
            let last = self.last_rebuild.lock().await;
            match *last {
                Some(when) => Utc::now() - when > chrono::Duration::seconds(TTL_SECONDS),
                None => true,
            }
        };
        if !needs_rebuild {
            return;
        }
        self.rebuild().await;
    }

    async fn rebuild(&self) {
        let buys = match self.source.success_buys_desc().await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "position tracker: failed to load buy rows, keeping stale snapshot");
                return;
            }
        };
        let balances = match self.source.free_balances().await {
            Ok(map) => map,
            Err(err) => {
                warn!(error = %err, "position tracker: failed to load balances, keeping stale snapshot");
                return;
            }
        };

        let mut rebuilt: HashMap<String, Position> = HashMap::new();
        for buy in buys {
            if rebuilt.contains_key(&buy.symbol) {
                continue; // most recent BUY per symbol wins (rows are createdAt desc)
            }
            let Some(asset) = base_asset(&buy.symbol) else {
                continue;
            };
            let free = balances.get(asset).copied().unwrap_or(Decimal::ZERO);
            if !free.is_positive() {
                continue;
            }
            let (Some(entry_price), Some(entry_qty)) = (buy.executed_price, buy.executed_quantity) else {
                continue;
            };
            let entry_time = buy.completed_at.unwrap_or_else(Utc::now);
            let order_id = buy.order_id.clone().unwrap_or_default();
            let mut position = Position::open(buy.id, buy.symbol.clone(), entry_qty, entry_price, entry_time, order_id);

            match self.source.ticker_price(&buy.symbol).await {
                Ok(price) => position.reprice(price),
                Err(_) => position.reprice(entry_price),
            }

            rebuilt.insert(position.symbol.clone(), position);
        }

        *self.positions.lock().await = rebuilt;
        *self.last_rebuild.lock().await = Some(Utc::now());
    }
}
