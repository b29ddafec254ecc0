//! MEXC Exchange Client (C1) — signed REST access to tickers, the
//! listing calendar, account balances, and order placement.
//!
//! The HMAC-SHA256 query-string signing follows the same
//! `generate_auth_headers` shape the teacher's Coinbase client uses,
//! adapted to MEXC's sorted-query-string scheme instead of a JSON body
//! signature.

use crate::decimal::Decimal;
use crate::domain::entities::{Confidence, DetectionSource, ExchangeRules, ListingEvent, RuleStatus};
use crate::domain::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::TradingError;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    pub price: Decimal,
}

#[derive(Debug, Clone)]
pub struct CalendarEntry {
    pub vcoin_id: String,
    pub vcoin_name: String,
    pub first_open_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub balances: HashMap<String, Decimal>,
    pub can_trade: bool,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub executed_quantity: Decimal,
    pub executed_price: Decimal,
    pub commission: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

/// Every call that hits the exchange over HTTP funnels through here so the
/// circuit breaker and retry classification apply uniformly.
pub struct MexcClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Zeroizing<String>,
    api_secret: Zeroizing<String>,
    recv_window: Duration,
    breaker: CircuitBreaker,
}

impl MexcClient {
    pub fn new(base_url: String, api_key: Zeroizing<String>, api_secret: Zeroizing<String>, recv_window: Duration) -> Self {
        MexcClient {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            api_secret,
            recv_window,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
        }
    }

    fn sign(&self, params: &BTreeMap<String, String>) -> Result<(String, String), TradingError> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| TradingError::Config(format!("invalid MEXC secret key: {e}")))?;
        mac.update(query.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok((query, signature))
    }

    fn signed_params(&self, mut params: BTreeMap<String, String>) -> Result<BTreeMap<String, String>, TradingError> {
        let timestamp = Utc::now().timestamp_millis();
        params.insert("timestamp".to_string(), timestamp.to_string());
        params.insert("recvWindow".to_string(), self.recv_window.as_millis().to_string());
        let (query, signature) = self.sign(&params)?;
        params.insert("signature".to_string(), signature);
        debug!(query, "signed MEXC request");
        Ok(params)
    }

    async fn call_signed<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        params: BTreeMap<String, String>,
    ) -> Result<T, TradingError> {
        let signed = self.signed_params(params)?;
        self.breaker.call(|| async { self.send(method, path, &signed).await }).await
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<T, TradingError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .request(method, &url)
            .header("X-MEXC-APIKEY", self.api_key.as_str())
            .query(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| TradingError::PermanentExchange(format!("malformed response: {e}")));
        }

        classify_error_body(status.as_u16(), &body)
    }

    pub async fn get_server_time(&self) -> Result<DateTime<Utc>, TradingError> {
        #[derive(Deserialize)]
        struct Resp {
            #[serde(rename = "serverTime")]
            server_time: i64,
        }
        let resp: Resp = self.send(reqwest::Method::GET, "/api/v3/time", &BTreeMap::new()).await?;
        Ok(Utc.timestamp_millis_opt(resp.server_time).single().unwrap_or_else(Utc::now))
    }

    pub async fn get_ticker(&self, symbol: &str) -> Result<Ticker, TradingError> {
        #[derive(Deserialize)]
        struct Resp {
            symbol: String,
            price: String,
        }
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.to_string());
        let resp: Resp = self
            .send(reqwest::Method::GET, "/api/v3/ticker/price", &params)
            .await?;
        let price = Decimal::from_str(&resp.price)
            .map_err(|e| TradingError::PermanentExchange(format!("invalid ticker price: {e}")))?;
        Ok(Ticker { symbol: resp.symbol, price })
    }

    pub async fn get_exchange_info(&self) -> Result<HashMap<String, ExchangeRules>, TradingError> {
        #[derive(Deserialize)]
        struct Filter {
            #[serde(rename = "filterType")]
            filter_type: String,
            #[serde(default)]
            #[serde(rename = "minQty")]
            min_qty: Option<String>,
            #[serde(default)]
            #[serde(rename = "maxQty")]
            max_qty: Option<String>,
            #[serde(default)]
            #[serde(rename = "stepSize")]
            step_size: Option<String>,
            #[serde(default)]
            #[serde(rename = "tickSize")]
            tick_size: Option<String>,
            #[serde(default)]
            #[serde(rename = "minNotional")]
            min_notional: Option<String>,
        }
        #[derive(Deserialize)]
        struct SymbolInfo {
            symbol: String,
            status: String,
            filters: Vec<Filter>,
        }
        #[derive(Deserialize)]
        struct Resp {
            symbols: Vec<SymbolInfo>,
        }

        let resp: Resp = self
            .send(reqwest::Method::GET, "/api/v3/exchangeInfo", &BTreeMap::new())
            .await?;

        let now = Utc::now();
        let mut rules = HashMap::new();
        for info in resp.symbols {
            let mut min_qty = Decimal::ZERO;
            let mut max_qty = Decimal::ZERO;
            let mut step_size = Decimal::ZERO;
            let mut tick_size = Decimal::ZERO;
            let mut min_notional = Decimal::ZERO;

            for filter in &info.filters {
                match filter.filter_type.as_str() {
                    "LOT_SIZE" => {
                        min_qty = parse_or_zero(&filter.min_qty);
                        max_qty = parse_or_zero(&filter.max_qty);
                        step_size = parse_or_zero(&filter.step_size);
                    }
                    "PRICE_FILTER" => tick_size = parse_or_zero(&filter.tick_size),
                    "MIN_NOTIONAL" => min_notional = parse_or_zero(&filter.min_notional),
                    _ => {}
                }
            }

            let status = if info.status == "ENABLED" {
                RuleStatus::Enabled
            } else {
                RuleStatus::Disabled
            };

            rules.insert(
                info.symbol.clone(),
                ExchangeRules {
                    symbol: info.symbol,
                    min_qty,
                    max_qty,
                    step_size,
                    min_notional,
                    tick_size,
                    status,
                    cached_at: now,
                },
            );
        }
        Ok(rules)
    }

    pub async fn get_calendar(&self) -> Result<Vec<ListingEvent>, TradingError> {
        #[derive(Deserialize)]
        struct NewCoin {
            #[serde(default)]
            #[serde(rename = "vcoinId")]
            vcoin_id: Option<String>,
            #[serde(default)]
            #[serde(rename = "vcoinName")]
            vcoin_name: Option<String>,
            #[serde(default)]
            #[serde(rename = "firstOpenTime")]
            first_open_time: Option<i64>,
        }
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "newCoins")]
            new_coins: Vec<NewCoin>,
        }
        #[derive(Deserialize)]
        struct Resp {
            data: Data,
        }

        let resp: Resp = self
            .send(reqwest::Method::GET, "/api/v3/rapid/calendar", &BTreeMap::new())
            .await?;

        let now = Utc::now();
        let mut events = Vec::new();
        for coin in resp.data.new_coins {
            let (Some(vcoin_id), Some(vcoin_name), Some(first_open_time)) =
                (coin.vcoin_id, coin.vcoin_name, coin.first_open_time)
            else {
                continue;
            };
            let Some(listing_time) = Utc.timestamp_millis_opt(first_open_time).single() else {
                continue;
            };
            events.push(ListingEvent {
                id: uuid::Uuid::new_v4(),
                symbol: vcoin_name,
                vcoin_id: Some(vcoin_id),
                detection_source: DetectionSource::Calendar,
                confidence: Confidence::High,
                listing_time: Some(listing_time),
                detected_at: now,
                freshness_deadline: listing_time + chrono::Duration::minutes(5),
                processed: false,
            });
        }
        Ok(events)
    }

    pub async fn get_account(&self) -> Result<Account, TradingError> {
        #[derive(Deserialize)]
        struct Balance {
            asset: String,
            free: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            balances: Vec<Balance>,
            #[serde(rename = "canTrade")]
            can_trade: bool,
        }

        let resp: Resp = self
            .call_signed(reqwest::Method::GET, "/api/v3/account", BTreeMap::new())
            .await?;

        let balances = resp
            .balances
            .into_iter()
            .filter_map(|b| Decimal::from_str(&b.free).ok().map(|free| (b.asset, free)))
            .collect();

        Ok(Account { balances, can_trade: resp.can_trade })
    }

    pub async fn place_market_buy(&self, symbol: &str, quantity: Decimal) -> Result<OrderAck, TradingError> {
        self.place_order(symbol, "BUY", "MARKET", quantity, None).await
    }

    pub async fn place_limit_buy(&self, symbol: &str, quantity: Decimal, price: Decimal) -> Result<OrderAck, TradingError> {
        self.place_order(symbol, "BUY", "LIMIT", quantity, Some(price)).await
    }

    pub async fn place_market_sell(&self, symbol: &str, quantity: Decimal) -> Result<OrderAck, TradingError> {
        self.place_order(symbol, "SELL", "MARKET", quantity, None).await
    }

    pub async fn place_limit_sell(&self, symbol: &str, quantity: Decimal, price: Decimal) -> Result<OrderAck, TradingError> {
        self.place_order(symbol, "SELL", "LIMIT", quantity, Some(price)).await
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<OrderAck, TradingError> {
        #[derive(Deserialize)]
        struct Resp {
            #[serde(rename = "orderId")]
            order_id: String,
            #[serde(rename = "executedQty")]
            executed_qty: String,
            #[serde(default, rename = "cummulativeQuoteQty")]
            cumulative_quote_qty: Option<String>,
        }

        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.to_string());
        params.insert("side".to_string(), side.to_string());
        params.insert("type".to_string(), order_type.to_string());
        params.insert("quantity".to_string(), quantity.to_string());
        if let Some(price) = price {
            params.insert("price".to_string(), price.to_string());
        }

        let resp: Resp = self.call_signed(reqwest::Method::POST, "/api/v3/order", params).await?;

        let executed_quantity = Decimal::from_str(&resp.executed_qty).unwrap_or(Decimal::ZERO);
        let executed_price = match (resp.cumulative_quote_qty, executed_quantity.is_zero()) {
            (Some(quote), false) => Decimal::from_str(&quote)
                .ok()
                .and_then(|q| q.checked_div(executed_quantity))
                .unwrap_or(price.unwrap_or(Decimal::ZERO)),
            _ => price.unwrap_or(Decimal::ZERO),
        };

        Ok(OrderAck {
            order_id: resp.order_id,
            executed_quantity,
            executed_price,
            commission: Decimal::ZERO,
        })
    }

    pub async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatus, TradingError> {
        #[derive(Deserialize)]
        struct Resp {
            status: String,
        }
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.to_string());
        params.insert("orderId".to_string(), order_id.to_string());
        let resp: Resp = self.call_signed(reqwest::Method::GET, "/api/v3/order", params).await?;
        Ok(match resp.status.as_str() {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            _ => OrderStatus::Rejected,
        })
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), TradingError> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), symbol.to_string());
        params.insert("orderId".to_string(), order_id.to_string());
        let _: serde_json::Value = self.call_signed(reqwest::Method::DELETE, "/api/v3/order", params).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::domain::services::trade_executor::TradeExchange for MexcClient {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, TradingError> {
        Ok(self.get_ticker(symbol).await?.price)
    }

    async fn exchange_rules(&self) -> Result<HashMap<String, ExchangeRules>, TradingError> {
        self.get_exchange_info().await
    }

    async fn usdt_balance(&self) -> Result<Decimal, TradingError> {
        let account = self.get_account().await?;
        Ok(account.balances.get("USDT").copied().unwrap_or(Decimal::ZERO))
    }

    async fn place_market_buy(&self, symbol: &str, quantity: Decimal) -> Result<OrderAck, TradingError> {
        MexcClient::place_market_buy(self, symbol, quantity).await
    }

    async fn place_limit_buy(&self, symbol: &str, quantity: Decimal, price: Decimal) -> Result<OrderAck, TradingError> {
        MexcClient::place_limit_buy(self, symbol, quantity, price).await
    }

    async fn place_market_sell(&self, symbol: &str, quantity: Decimal) -> Result<OrderAck, TradingError> {
        MexcClient::place_market_sell(self, symbol, quantity).await
    }

    async fn place_limit_sell(&self, symbol: &str, quantity: Decimal, price: Decimal) -> Result<OrderAck, TradingError> {
        MexcClient::place_limit_sell(self, symbol, quantity, price).await
    }
}

fn parse_or_zero(value: &Option<String>) -> Decimal {
    value
        .as_deref()
        .and_then(|s| Decimal::from_str(s).ok())
        .unwrap_or(Decimal::ZERO)
}

/// §4.1 failure model: `-1003`/5xx/timeouts are retryable, `-2015` (auth)
/// and `-1121` (invalid symbol) are fatal.
fn classify_error_body<T>(status: u16, body: &str) -> Result<T, TradingError> {
    #[derive(Deserialize)]
    struct ErrBody {
        code: Option<i64>,
        msg: Option<String>,
    }
    let parsed: ErrBody = serde_json::from_str(body).unwrap_or(ErrBody { code: None, msg: None });
    let message = parsed.msg.unwrap_or_else(|| body.to_string());

    match parsed.code {
        Some(-2015) => Err(TradingError::PermanentExchange(format!("auth rejected: {message}"))),
        Some(-1121) => Err(TradingError::PermanentExchange(format!("invalid symbol: {message}"))),
        Some(-1003) => Err(TradingError::TransientExchange(format!("rate limited: {message}"))),
        _ if status >= 500 => Err(TradingError::TransientExchange(format!("exchange 5xx: {message}"))),
        _ => {
            warn!(status, message, "unclassified MEXC error, treating as permanent");
            Err(TradingError::PermanentExchange(message))
        }
    }
}
