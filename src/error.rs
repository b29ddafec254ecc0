//! Error taxonomy for the trading core (spec §7).
//!
//! Every component returns a leaf error of its own; `TradingError` is the
//! taxonomy these leaf errors fold into at a gate boundary (C10, C11), so
//! callers can match on `.kind()` without caring which component raised it.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientExchange,
    PermanentExchange,
    Validation,
    Risk,
    Safety,
    Internal,
    Config,
}

#[derive(Debug, Error, Clone)]
pub enum TradingError {
    #[error("transient exchange error: {0}")]
    TransientExchange(String),

    #[error("permanent exchange error: {0}")]
    PermanentExchange(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("risk rejected: {0}")]
    Risk(String),

    #[error("safety limit: {0}")]
    Safety(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TradingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TradingError::TransientExchange(_) => ErrorKind::TransientExchange,
            TradingError::PermanentExchange(_) => ErrorKind::PermanentExchange,
            TradingError::Validation(_) => ErrorKind::Validation,
            TradingError::Risk(_) => ErrorKind::Risk,
            TradingError::Safety(_) => ErrorKind::Safety,
            TradingError::Internal(_) => ErrorKind::Internal,
            TradingError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether a caller may retry this error under a backoff policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientExchange)
    }

    /// The short machine-readable code surfaced on `TradeAttempt.errorCode`.
    pub fn code(&self) -> &'static str {
        match self {
            TradingError::TransientExchange(_) => "TRANSIENT_EXCHANGE",
            TradingError::PermanentExchange(_) => "PERMANENT_EXCHANGE",
            TradingError::Validation(_) => "VALIDATION",
            TradingError::Risk(_) => "RISK",
            TradingError::Safety(_) => "SAFETY",
            TradingError::Internal(_) => "INTERNAL",
            TradingError::Config(_) => "CONFIG",
        }
    }
}

impl From<sqlx::Error> for TradingError {
    fn from(e: sqlx::Error) -> Self {
        TradingError::Internal(format!("database error: {e}"))
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            TradingError::TransientExchange(e.to_string())
        } else {
            TradingError::PermanentExchange(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(TradingError::TransientExchange("x".into()).is_retryable());
        assert!(!TradingError::PermanentExchange("x".into()).is_retryable());
        assert!(!TradingError::Validation("x".into()).is_retryable());
        assert!(!TradingError::Risk("x".into()).is_retryable());
        assert!(!TradingError::Safety("x".into()).is_retryable());
        assert!(!TradingError::Internal("x".into()).is_retryable());
        assert!(!TradingError::Config("x".into()).is_retryable());
    }

    #[test]
    fn codes_match_kind() {
        assert_eq!(TradingError::Safety("x".into()).code(), "SAFETY");
    }
}
