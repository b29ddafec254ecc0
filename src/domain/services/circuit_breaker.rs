//! Circuit breaker (C1 dependency) guarding every HTTP call `MexcClient`
//! makes to MEXC. Spec §4.1: a burst of transient exchange failures opens
//! the circuit and rejects calls with `SERVICE_UNAVAILABLE` for a 60s
//! cooldown before probing again; permanent/validation/risk/safety errors
//! are the caller's fault, not the exchange's, so they pass straight
//! through without tripping the breaker.

use crate::error::TradingError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Circuit breaker states following the standard pattern
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, all requests fail immediately
    Open,
    /// Circuit is half-open, testing if service recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of transient failures before opening the circuit
    pub failure_threshold: u32,
    /// Number of successful probes needed to close circuit from half-open
    pub success_threshold: u32,
    /// Cooldown before moving from open to half-open (§4.1: 60s)
    pub timeout: Duration,
    /// Window duration for counting failures
    pub window_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            window_duration: Duration::from_secs(60),
        }
    }
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
    window_start: Instant,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_state_change: Instant::now(),
            window_start: Instant::now(),
        }
    }

    /// Reset failure window if expired
    fn reset_window_if_expired(&mut self, window_duration: Duration) {
        if self.window_start.elapsed() > window_duration {
            self.failure_count = 0;
            self.window_start = Instant::now();
        }
    }
}

/// Wraps `MexcClient`'s signed HTTP calls so a sustained run of transient
/// exchange errors opens the circuit instead of retrying into a dead
/// service.
///
/// - **Closed**: requests pass through normally
/// - **Open**: requests fail immediately with `TransientExchange("SERVICE_UNAVAILABLE...")`
/// - **Half-Open**: one probe request is let through to test recovery
///
/// # Example
/// ```rust,no_run
/// use mexc_snipe_core::domain::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
/// use mexc_snipe_core::error::TradingError;
///
/// # async fn run() {
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
///
/// match breaker.call(|| async { Ok::<_, TradingError>("ticker fetched") }).await {
///     Ok(result) => println!("ok: {result}"),
///     Err(e) => println!("rejected or failed: {e}"),
/// }
/// # }
/// ```
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    /// Get current circuit state
    pub async fn state(&self) -> CircuitState {
        let state = self.state.lock().await;
        state.state.clone()
    }

    /// Check if circuit allows requests
    pub async fn is_call_permitted(&self) -> bool {
        let mut state = self.state.lock().await;

        // Reset failure window if expired
        state.reset_window_if_expired(self.config.window_duration);

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                // Check if cooldown expired, move to half-open
                if let Some(last_failure) = state.last_failure_time {
                    if last_failure.elapsed() >= self.config.timeout {
                        state.state = CircuitState::HalfOpen;
                        state.success_count = 0;
                        state.last_state_change = Instant::now();
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    /// Record a successful operation
    async fn on_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    // Service recovered, close circuit
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.last_state_change = Instant::now();
                    state.window_start = Instant::now();
                }
            }
            CircuitState::Closed => {
                // Reset failure count on success in closed state
                state.failure_count = 0;
                state.window_start = Instant::now();
            }
            CircuitState::Open => {
                // Ignore success in open state (shouldn't happen)
            }
        }
    }

    /// Record a transient exchange failure
    async fn on_failure(&self) {
        let mut state = self.state.lock().await;
        state.reset_window_if_expired(self.config.window_duration);

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                state.last_failure_time = Some(Instant::now());

                if state.failure_count >= self.config.failure_threshold {
                    // Too many failures, open circuit
                    state.state = CircuitState::Open;
                    state.last_state_change = Instant::now();
                }
            }
            CircuitState::HalfOpen => {
                // Failure in half-open means MEXC is still unavailable
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.failure_count = 1;
                state.last_failure_time = Some(Instant::now());
                state.last_state_change = Instant::now();
            }
            CircuitState::Open => {
                // Update last failure time
                state.last_failure_time = Some(Instant::now());
            }
        }
    }

    /// Runs a signed MEXC call through the breaker.
    ///
    /// Only `TradingError::is_retryable()` failures (transient exchange
    /// errors: timeouts, connection resets) count toward the trip
    /// threshold — a validation or risk rejection reaching this far is a
    /// caller bug, not MEXC being down, and must not open the circuit.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, TradingError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, TradingError>>,
    {
        if !self.is_call_permitted().await {
            return Err(TradingError::TransientExchange(
                "SERVICE_UNAVAILABLE: circuit open".to_string(),
            ));
        }

        match f().await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(e) => {
                if e.is_retryable() {
                    self.on_failure().await;
                }
                Err(e)
            }
        }
    }

    /// Get statistics about circuit breaker, surfaced on `/monitoring/system-status`
    pub async fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock().await;
        CircuitBreakerStats {
            state: state.state.clone(),
            failure_count: state.failure_count,
            success_count: state.success_count,
            time_in_current_state: state.last_state_change.elapsed(),
            time_since_last_failure: state.last_failure_time.map(|t| t.elapsed()),
        }
    }

    /// Manually reset the circuit breaker to closed state
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.last_failure_time = None;
        state.last_state_change = Instant::now();
        state.window_start = Instant::now();
    }
}

/// Statistics about circuit breaker state
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub time_in_current_state: Duration,
    pub time_since_last_failure: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn transient() -> TradingError {
        TradingError::TransientExchange("timeout".to_string())
    }

    #[tokio::test]
    async fn closed_state_permits_calls() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new(config);

        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.is_call_permitted().await);
    }

    #[tokio::test]
    async fn opens_after_threshold_transient_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new(config);

        for _ in 0..3 {
            breaker.on_failure().await;
        }

        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.is_call_permitted().await);
    }

    #[tokio::test]
    async fn permanent_and_validation_errors_never_trip_the_breaker() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new(config);

        for _ in 0..5 {
            let _ = breaker
                .call(|| async { Err::<(), _>(TradingError::Validation("bad qty".to_string())) })
                .await;
        }

        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn moves_to_half_open_after_cooldown() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new(config);

        breaker.on_failure().await;
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        sleep(Duration::from_millis(150)).await;

        assert!(breaker.is_call_permitted().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn closes_after_success_threshold_in_half_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 2,
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new(config);

        breaker.on_failure().await;
        breaker.on_failure().await;

        sleep(Duration::from_millis(100)).await;
        let _ = breaker.is_call_permitted().await;

        breaker.on_success().await;
        breaker.on_success().await;

        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn call_rejects_with_transient_exchange_when_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new(config);

        let result = breaker.call(|| async { Ok::<_, TradingError>("success") }).await;
        assert!(result.is_ok());

        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<&str, _>(transient()) }).await;
        }

        let result = breaker.call(|| async { Ok::<_, TradingError>("success") }).await;
        assert!(matches!(result, Err(TradingError::TransientExchange(_))));
    }

    #[tokio::test]
    async fn reset_clears_open_state() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new(config);

        breaker.on_failure().await;
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.is_call_permitted().await);
    }

    #[tokio::test]
    async fn stats_report_failure_count() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

        breaker.on_failure().await;
        let stats = breaker.stats().await;

        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 1);
        assert!(stats.time_since_last_failure.is_some());
    }
}
