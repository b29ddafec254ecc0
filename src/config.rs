//! Process-level configuration loaded from the environment at startup.
//!
//! Follows the same per-variable "parse, validate, fall back to default
//! with a warning" shape the teacher's `TradingConfig::from_env` uses,
//! scoped to what a single-exchange snipe engine needs instead of a
//! per-exchange symbol map. `DATABASE_URL` is the one required variable
//! this struct itself enforces; `MEXC_API_KEY`/`MEXC_SECRET_KEY` are
//! validated separately by `secrets::load_mexc_credentials`.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub mexc_base_url: String,
    pub mexc_recv_window: Duration,
    pub api_timeout: Duration,
    pub db_query_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub max_trades_per_hour: u32,
    pub default_polling_interval: Duration,
    pub default_order_timeout: Duration,
    pub control_api_rate_limit_per_minute: u32,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> AppConfig {
        let mut config = AppConfig::default();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.bind_addr = parsed,
                Err(e) => warn!(value = %addr, error = %e, "invalid BIND_ADDR, using default"),
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = Some(url);
        }

        if let Ok(base) = std::env::var("MEXC_BASE_URL") {
            config.mexc_base_url = base;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(ms) = std::env::var("API_TIMEOUT_MS") {
            match ms.parse::<u64>() {
                Ok(ms) if ms > 0 => config.api_timeout = Duration::from_millis(ms),
                _ => warn!(value = %ms, "invalid API_TIMEOUT_MS, using default"),
            }
        }

        if let Ok(ms) = std::env::var("DB_QUERY_TIMEOUT_MS") {
            match ms.parse::<u64>() {
                Ok(ms) if ms > 0 => config.db_query_timeout = Duration::from_millis(ms),
                _ => warn!(value = %ms, "invalid DB_QUERY_TIMEOUT_MS, using default"),
            }
        }

        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            config.allowed_origins = origins.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }

        if let Ok(max) = std::env::var("MAX_TRADES_PER_HOUR") {
            match max.parse::<u32>() {
                Ok(value) if value > 0 => config.max_trades_per_hour = value,
                _ => warn!(value = %max, "invalid MAX_TRADES_PER_HOUR, using default"),
            }
        }

        if let Ok(ms) = std::env::var("DEFAULT_POLLING_INTERVAL_MS") {
            match ms.parse::<u64>() {
                Ok(ms) if ms > 0 => config.default_polling_interval = Duration::from_millis(ms),
                _ => warn!(value = %ms, "invalid DEFAULT_POLLING_INTERVAL_MS, using default"),
            }
        }

        if let Ok(ms) = std::env::var("DEFAULT_ORDER_TIMEOUT_MS") {
            match ms.parse::<u64>() {
                Ok(ms) if ms > 0 => config.default_order_timeout = Duration::from_millis(ms),
                _ => warn!(value = %ms, "invalid DEFAULT_ORDER_TIMEOUT_MS, using default"),
            }
        }

        if let Ok(window) = std::env::var("MEXC_RECV_WINDOW_MS") {
            match window.parse::<u64>() {
                Ok(ms) if ms > 0 => config.mexc_recv_window = Duration::from_millis(ms),
                _ => warn!(value = %window, "invalid MEXC_RECV_WINDOW_MS, using default"),
            }
        }

        if let Ok(limit) = std::env::var("CONTROL_API_RATE_LIMIT_PER_MINUTE") {
            match limit.parse::<u32>() {
                Ok(value) if value > 0 => config.control_api_rate_limit_per_minute = value,
                _ => warn!(value = %limit, "invalid CONTROL_API_RATE_LIMIT_PER_MINUTE, using default"),
            }
        }

        config
    }

    /// §6: `DATABASE_URL` is the one required variable this struct
    /// enforces; `MEXC_API_KEY`/`MEXC_SECRET_KEY` are validated by
    /// `secrets::load_mexc_credentials` and reported separately so the
    /// caller can map either failure to exit code 2.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_none() {
            return Err("DATABASE_URL is required".to_string());
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind_addr: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), 8080),
            database_url: None,
            mexc_base_url: "https://api.mexc.com".to_string(),
            mexc_recv_window: Duration::from_millis(5000),
            api_timeout: Duration::from_millis(10_000),
            db_query_timeout: Duration::from_millis(5_000),
            allowed_origins: Vec::new(),
            max_trades_per_hour: 10,
            default_polling_interval: Duration::from_millis(5_000),
            default_order_timeout: Duration::from_millis(10_000),
            control_api_rate_limit_per_minute: 60,
            log_level: "info".to_string(),
        }
    }
}
