//! Position Monitor (C9) — a scheduled loop that reprices open positions
//! and evaluates the active sell strategy, grounded on the teacher's
//! scheduled-tick actor shape (one task, one ticking interval, cooperative
//! cancellation).

use crate::decimal::Decimal;
use crate::domain::entities::{Position, SellStrategy, TradingConfiguration};
use crate::domain::services::trade_executor::{ConfigSource, PositionStore};
use crate::error::TradingError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, TradingError>;
}

#[async_trait]
impl PriceSource for crate::infrastructure::mexc_client::MexcClient {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, TradingError> {
        Ok(self.get_ticker(symbol).await?.price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellIntent {
    pub symbol: String,
    pub quantity: Decimal,
    pub reason: String,
}

const BPS_DENOMINATOR: i64 = 10_000;

fn bps_fraction(bps: i64) -> Decimal {
    Decimal::from_f64(bps as f64 / BPS_DENOMINATOR as f64).unwrap_or(Decimal::ZERO)
}

/// §4.9 sell-condition evaluation. Pure function so it can be unit tested
/// without a running loop.
pub fn evaluate_sell_condition(position: &Position, config: &TradingConfiguration, now: chrono::DateTime<Utc>) -> Option<String> {
    let profit_target_price = position
        .entry_price
        .checked_mul(bps_fraction(BPS_DENOMINATOR + config.profit_target_bps));
    let stop_loss_price = position
        .entry_price
        .checked_mul(bps_fraction(BPS_DENOMINATOR - config.stop_loss_bps));
    let time_based_exit_met = now >= position.entry_time + chrono::Duration::seconds(config.time_based_exit_minutes * 60);

    let profit_target_met = matches!(profit_target_price, Some(target) if position.current_price >= target);
    let stop_loss_met = matches!(stop_loss_price, Some(floor) if position.current_price <= floor);

    match config.sell_strategy {
        SellStrategy::ProfitTarget => profit_target_met.then(|| "PROFIT_TARGET".to_string()),
        SellStrategy::StopLoss => stop_loss_met.then(|| "STOP_LOSS".to_string()),
        SellStrategy::TimeBased => time_based_exit_met.then(|| "TIME_BASED".to_string()),
        SellStrategy::Combined => {
            if profit_target_met {
                Some("PROFIT_TARGET".to_string())
            } else if stop_loss_met {
                Some("STOP_LOSS".to_string())
            } else if time_based_exit_met {
                Some("TIME_BASED".to_string())
            } else {
                None
            }
        }
        // §9 open question: TRAILING_STOP must never fire until resolved.
        SellStrategy::TrailingStop => None,
    }
}

pub struct PositionMonitor {
    prices: Arc<dyn PriceSource>,
    positions: Arc<dyn PositionStore>,
    config_source: Arc<dyn ConfigSource>,
    running: AtomicBool,
}

impl PositionMonitor {
    pub fn new(prices: Arc<dyn PriceSource>, positions: Arc<dyn PositionStore>, config_source: Arc<dyn ConfigSource>) -> Self {
        PositionMonitor {
            prices,
            positions,
            config_source,
            running: AtomicBool::new(false),
        }
    }

    /// Forces a synchronous rebuild of the position cache against C2's
    /// current balances/tickers, so a restarted process doesn't trade
    /// blind against stale in-memory state before the first detection tick.
    pub async fn reconcile_once(&self) -> Vec<crate::domain::entities::Position> {
        self.positions.snapshot().await
    }

    /// `startMonitoring()`/`stopMonitoring()` are idempotent; calling start
    /// while already running fails with `MONITOR_ALREADY_RUNNING`.
    pub async fn run(
        self: Arc<Self>,
        interval: std::time::Duration,
        token: CancellationToken,
        on_sell_intent: impl Fn(SellIntent) + Send + Sync + 'static,
    ) -> Result<(), TradingError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TradingError::Internal("MONITOR_ALREADY_RUNNING".to_string()));
        }

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("position monitor stopping on cancellation");
                    self.running.store(false, Ordering::SeqCst);
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick_once(&on_sell_intent).await {
                        warn!(error = %err, "position monitor tick failed");
                    }
                }
            }
        }
    }

    async fn tick_once(&self, on_sell_intent: &(impl Fn(SellIntent) + Send + Sync)) -> Result<(), TradingError> {
        let positions = self.positions.snapshot().await;
        let Some(config) = self.config_source.active_configuration().await? else {
            return Ok(());
        };

        for mut position in positions {
            let price = match self.prices.ticker_price(&position.symbol).await {
                Ok(price) => price,
                Err(err) => {
                    warn!(symbol = %position.symbol, error = %err, "position monitor: ticker fetch failed, skipping tick");
                    continue;
                }
            };
            self.positions.update_position(&position.symbol, Some(price), None).await;
            position.reprice(price);

            if let Some(reason) = evaluate_sell_condition(&position, &config, Utc::now()) {
                on_sell_intent(SellIntent {
                    symbol: position.symbol.clone(),
                    quantity: position.quantity,
                    reason,
                });
            }
        }
        Ok(())
    }
}
