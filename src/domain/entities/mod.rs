pub mod bot_run;
pub mod config;
pub mod exchange_rules;
pub mod listing_event;
pub mod position;
pub mod trade_attempt;

pub use bot_run::{BotRun, BotRunStatus, BotStatus};
pub use config::{SellStrategy, TradingConfiguration};
pub use exchange_rules::{ExchangeRules, RuleStatus};
pub use listing_event::{Confidence, DetectionSource, ListingEvent};
pub use position::Position;
pub use trade_attempt::{OrderType, TradeAttempt, TradeLog, TradeSide, TradeStatus};
