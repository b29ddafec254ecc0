//! End-to-end coverage over the full detect → buy → monitor → sell
//! pipeline and the at-most-one-run race, exercised against in-memory
//! fakes instead of a live exchange — the same whole-pipeline-over-a-
//! mock-exchange shape the teacher's e2e suite uses.

use async_trait::async_trait;
use chrono::Utc;
use mexc_snipe_core::application::actors::listing_detector::{ListingDetector, ListingSource, SignalStore};
use mexc_snipe_core::application::actors::position_monitor::{PositionMonitor, PriceSource};
use mexc_snipe_core::application::orchestrator::{BotRunStore, BotStatusStore, TradingOrchestrator};
use mexc_snipe_core::decimal::Decimal;
use mexc_snipe_core::domain::entities::{
    BotRun, BotRunStatus, BotStatus, Confidence, DetectionSource, ExchangeRules, ListingEvent, OrderType, Position, RuleStatus, TradeAttempt,
    TradeStatus, TradingConfiguration,
};
use mexc_snipe_core::domain::services::position_tracker::{PositionSource, PositionTracker};
use mexc_snipe_core::domain::services::risk_manager::RiskManager;
use mexc_snipe_core::domain::services::rules_cache::RulesCache;
use mexc_snipe_core::domain::services::safety_checker::{SafetyChecker, TradeActivitySource};
use mexc_snipe_core::domain::services::trade_executor::{ConfigSource, TradeAttemptStore, TradeExchange, TradeExecutor};
use mexc_snipe_core::error::TradingError;
use mexc_snipe_core::infrastructure::mexc_client::OrderAck;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;
use uuid::Uuid;

const SYMBOL: &str = "FOOUSDT";

fn rules() -> ExchangeRules {
    ExchangeRules {
        symbol: SYMBOL.to_string(),
        min_qty: Decimal::from_str("0.0001").unwrap(),
        max_qty: Decimal::from_str("1000").unwrap(),
        step_size: Decimal::from_str("0.0001").unwrap(),
        min_notional: Decimal::from_str("1").unwrap(),
        tick_size: Decimal::from_str("0.01").unwrap(),
        status: RuleStatus::Enabled,
        cached_at: Utc::now(),
    }
}

/// A single mock exchange shared by the detector, the executor and the
/// position monitor, so a buy's fill price is visible to the next tick's
/// ticker read. `price` climbs past the profit target once a buy lands.
struct MockExchange {
    price: StdMutex<Decimal>,
    buys: AtomicU32,
    sells: AtomicU32,
}

impl MockExchange {
    fn new() -> Self {
        MockExchange {
            price: StdMutex::new(Decimal::from_str("10").unwrap()),
            buys: AtomicU32::new(0),
            sells: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TradeExchange for MockExchange {
    async fn ticker_price(&self, _symbol: &str) -> Result<Decimal, TradingError> {
        Ok(*self.price.lock().unwrap())
    }
    async fn exchange_rules(&self) -> Result<HashMap<String, ExchangeRules>, TradingError> {
        Ok(HashMap::from([(SYMBOL.to_string(), rules())]))
    }
    async fn usdt_balance(&self) -> Result<Decimal, TradingError> {
        Ok(Decimal::from_str("100000").unwrap())
    }
    async fn place_market_buy(&self, _symbol: &str, quantity: Decimal) -> Result<OrderAck, TradingError> {
        let price = *self.price.lock().unwrap();
        self.buys.fetch_add(1, Ordering::SeqCst);
        // the fill jumps the price past the 5% profit target so the next
        // position-monitor tick fires a sell.
        *self.price.lock().unwrap() = price.checked_mul(Decimal::from_str("1.10").unwrap()).unwrap();
        Ok(OrderAck {
            order_id: format!("buy-{}", self.buys.load(Ordering::SeqCst)),
            executed_quantity: quantity,
            executed_price: price,
            commission: Decimal::ZERO,
        })
    }
    async fn place_limit_buy(&self, symbol: &str, quantity: Decimal, _price: Decimal) -> Result<OrderAck, TradingError> {
        self.place_market_buy(symbol, quantity).await
    }
    async fn place_market_sell(&self, _symbol: &str, quantity: Decimal) -> Result<OrderAck, TradingError> {
        let price = *self.price.lock().unwrap();
        self.sells.fetch_add(1, Ordering::SeqCst);
        Ok(OrderAck {
            order_id: format!("sell-{}", self.sells.load(Ordering::SeqCst)),
            executed_quantity: quantity,
            executed_price: price,
            commission: Decimal::ZERO,
        })
    }
    async fn place_limit_sell(&self, symbol: &str, quantity: Decimal, _price: Decimal) -> Result<OrderAck, TradingError> {
        self.place_market_sell(symbol, quantity).await
    }
}

#[async_trait]
impl ListingSource for MockExchange {
    async fn get_calendar(&self) -> Result<Vec<ListingEvent>, TradingError> {
        Ok(vec![])
    }
    async fn symbol_snapshot(&self) -> Result<HashSet<String>, TradingError> {
        Ok(HashSet::new())
    }
}

#[async_trait]
impl PriceSource for MockExchange {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, TradingError> {
        TradeExchange::ticker_price(self, symbol).await
    }
}

#[async_trait]
impl PositionSource for MockExchange {
    async fn success_buys_desc(&self) -> Result<Vec<TradeAttempt>, TradingError> {
        Ok(vec![])
    }
    async fn free_balances(&self) -> Result<HashMap<String, Decimal>, TradingError> {
        Ok(HashMap::new())
    }
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, TradingError> {
        TradeExchange::ticker_price(self, symbol).await
    }
}

#[async_trait]
impl TradeActivitySource for MockExchange {
    async fn trades_submitted_since(&self, _since: chrono::DateTime<Utc>) -> Result<i64, TradingError> {
        Ok(0)
    }
    async fn quote_spent_since(&self, _since: chrono::DateTime<Utc>) -> Result<Decimal, TradingError> {
        Ok(Decimal::ZERO)
    }
}

/// A single pre-seeded "new symbol detected" signal; `SymbolComparison`
/// events are always execution-ready regardless of listing time.
struct SeededSignal(StdMutex<Option<ListingEvent>>);

#[async_trait]
impl SignalStore for SeededSignal {
    async fn exists_recent(&self, _symbol: &str, _source: DetectionSource, _within: chrono::Duration) -> Result<bool, TradingError> {
        Ok(false)
    }
    async fn append(&self, _event: &ListingEvent) -> Result<(), TradingError> {
        Ok(())
    }
    async fn get_unprocessed(&self) -> Result<Vec<ListingEvent>, TradingError> {
        Ok(self.0.lock().unwrap().clone().into_iter().collect())
    }
    async fn mark_processed(&self, _id: Uuid) -> Result<(), TradingError> {
        *self.0.lock().unwrap() = None;
        Ok(())
    }
}

struct FixedConfig(TradingConfiguration);

#[async_trait]
impl ConfigSource for FixedConfig {
    async fn active_configuration(&self) -> Result<Option<TradingConfiguration>, TradingError> {
        Ok(Some(self.0.clone()))
    }
}

struct InMemoryAttempts(StdMutex<HashMap<Uuid, TradeAttempt>>);

impl InMemoryAttempts {
    fn new() -> Self {
        InMemoryAttempts(StdMutex::new(HashMap::new()))
    }
}

#[async_trait]
impl TradeAttemptStore for InMemoryAttempts {
    async fn create_pending(&self, attempt: &TradeAttempt) -> Result<(), TradingError> {
        self.0.lock().unwrap().insert(attempt.id, attempt.clone());
        Ok(())
    }
    async fn mark_success(
        &self,
        attempt: &TradeAttempt,
        ack: &OrderAck,
        _submitted_at: chrono::DateTime<Utc>,
        completed_at: chrono::DateTime<Utc>,
    ) -> Result<(), TradingError> {
        let mut attempt = attempt.clone();
        attempt.status = TradeStatus::Success;
        attempt.order_id = Some(ack.order_id.clone());
        attempt.executed_quantity = Some(ack.executed_quantity);
        attempt.executed_price = Some(ack.executed_price);
        attempt.completed_at = Some(completed_at);
        self.0.lock().unwrap().insert(attempt.id, attempt);
        Ok(())
    }
    async fn mark_failed(&self, attempt: &TradeAttempt, error_code: &str, error_message: &str, completed_at: chrono::DateTime<Utc>) -> Result<(), TradingError> {
        let mut attempt = attempt.clone();
        attempt.status = TradeStatus::Failed;
        attempt.error_code = Some(error_code.to_string());
        attempt.error_message = Some(error_message.to_string());
        attempt.completed_at = Some(completed_at);
        self.0.lock().unwrap().insert(attempt.id, attempt);
        Ok(())
    }
    async fn get(&self, id: Uuid) -> Result<Option<TradeAttempt>, TradingError> {
        Ok(self.0.lock().unwrap().get(&id).cloned())
    }
}

struct InMemoryRuns {
    active: StdMutex<bool>,
}

#[async_trait]
impl BotRunStore for InMemoryRuns {
    async fn has_active_run(&self, _configuration_id: Uuid) -> Result<bool, TradingError> {
        Ok(*self.active.lock().unwrap())
    }
    async fn create(&self, _run: &BotRun) -> Result<(), TradingError> {
        *self.active.lock().unwrap() = true;
        Ok(())
    }
    async fn update_status(&self, _id: Uuid, status: BotRunStatus, _stopped_at: Option<chrono::DateTime<Utc>>) -> Result<(), TradingError> {
        if matches!(status, BotRunStatus::Stopped | BotRunStatus::Failed) {
            *self.active.lock().unwrap() = false;
        }
        Ok(())
    }
    async fn heartbeat(&self, _id: Uuid, _at: chrono::DateTime<Utc>) -> Result<(), TradingError> {
        Ok(())
    }
    async fn mark_failed(&self, _id: Uuid, _error_message: &str, _at: chrono::DateTime<Utc>) -> Result<(), TradingError> {
        *self.active.lock().unwrap() = false;
        Ok(())
    }
}

struct NoopStatus;

#[async_trait]
impl BotStatusStore for NoopStatus {
    async fn upsert(&self, _status: &BotStatus) -> Result<(), TradingError> {
        Ok(())
    }
    async fn get(&self) -> Result<Option<BotStatus>, TradingError> {
        Ok(None)
    }
}

fn sample_config() -> TradingConfiguration {
    let mut config = TradingConfiguration::default_for(Uuid::new_v4());
    config.enabled_pairs.insert(SYMBOL.to_string());
    config.polling_interval_ms = 20;
    config
}

fn build_orchestrator(exchange: Arc<MockExchange>, signals: Arc<SeededSignal>, config: TradingConfiguration) -> Arc<TradingOrchestrator> {
    let rules_cache = Arc::new(RulesCache::new());
    let safety = Arc::new(SafetyChecker::new(exchange.clone()));
    let risk = Arc::new(RiskManager::new(Default::default()));
    let positions = Arc::new(PositionTracker::new(exchange.clone()));
    let config_source: Arc<dyn ConfigSource> = Arc::new(FixedConfig(config));
    let attempts = Arc::new(InMemoryAttempts::new());

    let trade_exchange: Arc<dyn TradeExchange> = exchange.clone();
    let executor = Arc::new(TradeExecutor::new(
        trade_exchange,
        rules_cache,
        safety,
        risk,
        positions.clone(),
        config_source.clone(),
        attempts,
        mexc_snipe_core::rate_limit::create_trade_submission_limiter(1000),
    ));

    let listing_source: Arc<dyn ListingSource> = exchange.clone();
    let detector = Arc::new(ListingDetector::new(listing_source, signals.clone()));

    let price_source: Arc<dyn PriceSource> = exchange;
    let monitor = Arc::new(PositionMonitor::new(price_source, positions, config_source));

    Arc::new(TradingOrchestrator::new(
        Arc::new(InMemoryRuns { active: StdMutex::new(false) }),
        Arc::new(NoopStatus),
        signals,
        executor,
        detector,
        monitor,
    ))
}

/// S5: a symbol-comparison signal is detected, bought, and — once the
/// mock exchange's price jumps past the profit target on fill — sold
/// again without any manual intervention.
#[tokio::test]
async fn full_snipe_cycle_buys_then_sells_on_profit_target() {
    let exchange = Arc::new(MockExchange::new());
    let event = ListingEvent {
        id: Uuid::new_v4(),
        symbol: SYMBOL.to_string(),
        vcoin_id: None,
        detection_source: DetectionSource::SymbolComparison,
        confidence: Confidence::High,
        listing_time: None,
        detected_at: Utc::now(),
        freshness_deadline: Utc::now() + chrono::Duration::seconds(60),
        processed: false,
    };
    let signals = Arc::new(SeededSignal(StdMutex::new(Some(event))));
    let orchestrator = build_orchestrator(exchange.clone(), signals, sample_config());

    orchestrator.start_trading_bot(sample_config()).await.unwrap();

    let mut sold = false;
    for _ in 0..50 {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        if exchange.sells.load(Ordering::SeqCst) >= 1 {
            sold = true;
            break;
        }
    }

    orchestrator.stop_trading_bot().await.unwrap();

    assert!(exchange.buys.load(Ordering::SeqCst) >= 1, "expected the snipe to buy the detected listing");
    assert!(sold, "expected the position monitor to sell once price crossed the profit target");
}

/// S6: two concurrent `startTradingBot` calls for the same configuration
/// must not both succeed — only one run may be active at a time.
#[tokio::test]
async fn starting_the_same_configuration_twice_concurrently_admits_only_one_winner() {
    let exchange = Arc::new(MockExchange::new());
    let signals = Arc::new(SeededSignal(StdMutex::new(None)));
    let config = sample_config();
    let orchestrator = build_orchestrator(exchange, signals, config.clone());

    let first = orchestrator.clone();
    let second = orchestrator.clone();
    let config_a = config.clone();
    let config_b = config;

    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.start_trading_bot(config_a).await }),
        tokio::spawn(async move { second.start_trading_bot(config_b).await }),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.is_ok(), b.is_ok(), "exactly one of the two concurrent starts must win");
    orchestrator.stop_trading_bot().await.unwrap();
}
