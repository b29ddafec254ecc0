//! Control API authentication (C6 gate) — Bearer-token check in front of
//! every `/bot/*`, `/trading/*` and `/monitoring/*` route.
//!
//! Key strength is validated through the same `secrets::validate_secret_strength`
//! gate `MEXC_API_KEY`/`MEXC_API_SECRET` go through, so a weak Control API
//! key fails the same way a weak exchange credential would.

use crate::secrets;
use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use std::collections::HashSet;
use std::sync::OnceLock;

const MIN_KEY_LENGTH: usize = 32;

/// Global store for valid Control API keys
static VALID_API_KEYS: OnceLock<HashSet<String>> = OnceLock::new();

/// Initialize the Control API keys from the environment.
///
/// # Security
/// This function requires the `CONTROL_API_KEYS` environment variable to be
/// set. If no keys are configured, the application **panics** rather than
/// serve the Control API unauthenticated — a missing key set is treated the
/// same as a missing `MEXC_API_KEY`: a fatal startup condition, not a
/// degraded-mode default.
///
/// # Panics
/// Panics if `CONTROL_API_KEYS` is unset, empty, or contains a key shorter
/// than `MIN_KEY_LENGTH`.
pub fn init_api_keys() {
    let keys_env = std::env::var("CONTROL_API_KEYS").expect(
        "SECURITY ERROR: CONTROL_API_KEYS environment variable is not set. \
         Set it to a comma-separated list of secure API keys. \
         Example: CONTROL_API_KEYS=your_secure_key_here,another_key",
    );

    let mut keys = HashSet::new();
    for key in keys_env.split(',') {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        if let Err(e) = secrets::validate_secret_strength(key, MIN_KEY_LENGTH) {
            panic!("SECURITY ERROR: weak CONTROL_API_KEYS entry: {e}. Generate one with: openssl rand -base64 32");
        }
        keys.insert(key.to_string());
    }

    if keys.is_empty() {
        panic!(
            "SECURITY ERROR: no valid API keys found in CONTROL_API_KEYS. \
             At least one key with length >= {MIN_KEY_LENGTH} is required."
        );
    }

    let count = keys.len();
    VALID_API_KEYS.set(keys).expect("API keys already initialized");
    tracing::info!(count, "control API authentication initialized");
}

fn is_valid_api_key(key: &str) -> bool {
    VALID_API_KEYS.get().map(|keys| keys.contains(key)).unwrap_or(false)
}

/// `axum::middleware::from_fn` layer requiring a valid `Authorization:
/// Bearer <key>` header, chained after `rate_limit::rate_limit_middleware`
/// on every protected route.
pub async fn require_auth(request: Request, next: Next) -> Result<Response, StatusCode> {
    let auth_header = request.headers().get("Authorization").and_then(|v| v.to_str().ok());

    match auth_header {
        Some(auth) if auth.starts_with("Bearer ") => {
            let key = &auth[7..];
            if is_valid_api_key(key) {
                Ok(next.run(request).await)
            } else {
                tracing::warn!("rejected control API request: invalid API key");
                Err(StatusCode::UNAUTHORIZED)
            }
        }
        Some(_) => {
            tracing::warn!("rejected control API request: malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("rejected control API request: missing Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_keys_are_accepted_and_unknown_keys_rejected() {
        let mut keys = HashSet::new();
        keys.insert("a".repeat(32));
        keys.insert("b".repeat(40));
        let _ = VALID_API_KEYS.set(keys);

        assert!(is_valid_api_key(&"a".repeat(32)));
        assert!(is_valid_api_key(&"b".repeat(40)));
        assert!(!is_valid_api_key("too-short"));
        assert!(!is_valid_api_key(""));
    }
}
