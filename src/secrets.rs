//! Secret loading for exchange credentials.
//!
//! Wipes the key material from memory on drop via `zeroize`, the same
//! guarantee the teacher's secret loader gives 1Password-backed secrets —
//! simplified here to the single source this deployment actually has: the
//! environment.

use std::env;
use tracing::warn;
use zeroize::Zeroizing;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("secret validation failed: {0}")]
    ValidationFailed(String),
}

fn load_from_env(env_var_name: &str) -> Result<Zeroizing<String>, SecretError> {
    env::var(env_var_name)
        .map(Zeroizing::new)
        .map_err(|_| SecretError::EnvVarNotSet(env_var_name.to_string()))
}

pub fn validate_secret_strength(secret: &str, min_length: usize) -> Result<(), SecretError> {
    if secret.len() < min_length {
        return Err(SecretError::ValidationFailed(format!(
            "secret too short: {} characters (minimum: {})",
            secret.len(),
            min_length
        )));
    }

    let weak_patterns = ["test", "demo", "example", "placeholder", "changeme", "12345"];
    let secret_lower = secret.to_lowercase();
    for pattern in &weak_patterns {
        if secret_lower.contains(pattern) {
            warn!(pattern, "secret contains a weak placeholder pattern");
        }
    }

    Ok(())
}

/// Loads and validates the MEXC API key/secret pair §4.1 needs to sign
/// requests. Both must be present and non-trivial or startup fails.
pub fn load_mexc_credentials() -> Result<(Zeroizing<String>, Zeroizing<String>), SecretError> {
    let api_key = load_from_env("MEXC_API_KEY")?;
    let api_secret = load_from_env("MEXC_API_SECRET")?;
    validate_secret_strength(&api_key, 16)?;
    validate_secret_strength(&api_secret, 16)?;
    Ok((api_key, api_secret))
}
