//! A small, explicit retry/backoff combinator (spec §9).
//!
//! Replaces the hidden-policy "retry wrapper" the source buries inside its
//! effect pipeline with a plain function: the policy is a value, the
//! retried call is a closure, and the loop is straight-line code.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    /// §4.11's detection/execution loop retry wrapper: 2 retries, 500ms
    /// base, exponential to 2s cap, ±25% jitter.
    pub fn detection_loop() -> Self {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter_span = capped * self.jitter;
        let jittered = rand::thread_rng().gen_range((capped - jitter_span).max(0.0)..=(capped + jitter_span));
        Duration::from_secs_f64(jittered)
    }
}

/// Runs `f` under `policy`, retrying only errors for which `is_retryable`
/// returns true. Stops after `policy.max_retries` attempts past the first,
/// or as soon as `deadline` elapses (spec §5: "aborts ... if total elapsed
/// >30s"), whichever comes first.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    deadline: Duration,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let start = tokio::time::Instant::now();
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_retries || !is_retryable(&err) || start.elapsed() >= deadline {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}
