//! Cart configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `HARVEST_API_BASE_URL` - Base URL of the cart API
//!
//! ## Optional
//! - `HARVEST_LANG` - Language sent as `lang` (default: en)
//! - `HARVEST_ADDRESS_ID` - Delivery address sent as `addressId`
//! - `HARVEST_CURRENCY` - Currency for guest cart display (default: USD)
//! - `HARVEST_HTTP_TIMEOUT_SECS` - Request timeout (default: 30)
//! - `HARVEST_QUERY_RETRIES` - Retries for cart fetches (default: 2)
//! - `HARVEST_MUTATION_RETRIES` - Retries for cart mutations (default: 0)
//! - `HARVEST_RETRY_BACKOFF_MS` - Backoff before the first retry (default: 500)
//! - `HARVEST_CACHE_TTL_SECS` - Server cart cache lifetime (default: 300)
//! - `HARVEST_STORAGE_DIR` - Guest cart directory (default: .harvest)
//! - `HARVEST_ACCESS_TOKEN` - Bearer token for a signed-in user
//! - `HARVEST_REFRESH_TOKEN` - Refresh token for that user
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use harvest_core::{AddressId, CurrencyCode, Locale};

use crate::api::AuthTokens;
use crate::retry::RetryPolicy;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Cart API connection settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL; cart paths are appended to it.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// `User-Agent` header.
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
            user_agent: concat!("harvest-cart/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Bearer tokens supplied through the environment.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct Credentials {
    /// Access token.
    pub access_token: SecretString,
    /// Refresh token.
    pub refresh_token: Option<SecretString>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Credentials {
    /// Convert into tokens for the API client.
    #[must_use]
    pub fn to_tokens(&self) -> AuthTokens {
        AuthTokens::new(self.access_token.clone(), self.refresh_token.clone())
    }
}

/// Cart configuration.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// API connection settings.
    pub api: ApiConfig,
    /// Language for API calls and labels.
    pub locale: Locale,
    /// Delivery address for pricing and ETA.
    pub address_id: Option<AddressId>,
    /// Currency for guest cart display.
    pub currency: CurrencyCode,
    /// Retry policy for cart fetches.
    pub query_retry: RetryPolicy,
    /// Retry policy for cart mutations.
    pub mutation_retry: RetryPolicy,
    /// Server cart cache lifetime.
    pub cache_ttl: Duration,
    /// Directory holding the guest cart snapshot.
    pub storage_dir: PathBuf,
    /// Tokens for a signed-in user, if configured.
    pub credentials: Option<Credentials>,
    /// Sentry DSN for error tracking.
    pub sentry_dsn: Option<String>,
}

impl HarvestConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, values fail
    /// to parse, or tokens look like placeholders.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api = ApiConfig {
            base_url: get_required_env("HARVEST_API_BASE_URL")?,
            timeout_secs: get_parsed_env("HARVEST_HTTP_TIMEOUT_SECS", "30")?,
            ..ApiConfig::default()
        };

        let locale: Locale = get_parsed_env("HARVEST_LANG", "en")?;
        let currency = parse_currency(&get_env_or_default("HARVEST_CURRENCY", "USD"))?;
        let address_id = get_optional_env("HARVEST_ADDRESS_ID")
            .filter(|s| !s.trim().is_empty())
            .map(AddressId::new);

        let backoff = Duration::from_millis(get_parsed_env("HARVEST_RETRY_BACKOFF_MS", "500")?);
        let query_retry = RetryPolicy::new(get_parsed_env("HARVEST_QUERY_RETRIES", "2")?, backoff);
        let mutation_retry =
            RetryPolicy::new(get_parsed_env("HARVEST_MUTATION_RETRIES", "0")?, backoff);

        let cache_ttl = Duration::from_secs(get_parsed_env("HARVEST_CACHE_TTL_SECS", "300")?);
        let storage_dir = PathBuf::from(get_env_or_default("HARVEST_STORAGE_DIR", ".harvest"));

        let credentials = match get_optional_env("HARVEST_ACCESS_TOKEN") {
            Some(access) => Some(Credentials {
                access_token: validated_secret(access, "HARVEST_ACCESS_TOKEN")?,
                refresh_token: get_optional_env("HARVEST_REFRESH_TOKEN")
                    .map(|r| validated_secret(r, "HARVEST_REFRESH_TOKEN"))
                    .transpose()?,
            }),
            None => None,
        };

        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            api,
            locale,
            address_id,
            currency,
            query_retry,
            mutation_retry,
            cache_ttl,
            storage_dir,
            credentials,
            sentry_dsn,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default`.
fn get_parsed_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn parse_currency(value: &str) -> Result<CurrencyCode, ConfigError> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_uppercase())).map_err(|_| {
        ConfigError::InvalidEnvVar(
            "HARVEST_CURRENCY".to_string(),
            format!("unsupported currency '{value}'"),
        )
    })
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a token is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Real tokens (JWTs, opaque API tokens) have high entropy
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}

fn validated_secret(value: String, key: &str) -> Result<SecretString, ConfigError> {
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
