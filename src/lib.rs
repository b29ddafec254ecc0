//! MEXC listing-snipe trading core.
//!
//! Detects newly-listed MEXC spot pairs, buys a small position the moment
//! the pair opens, tracks the position, and closes it on a configurable
//! sell rule. See `application::orchestrator` for the top-level lifecycle.

pub mod application;
pub mod auth;
pub mod config;
pub mod decimal;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod retry;
pub mod secrets;
