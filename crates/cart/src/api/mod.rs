//! Server cart API client.
//!
//! # Architecture
//!
//! - Plain JSON over HTTP with `reqwest`; one round trip per operation
//! - The server is the source of truth for authenticated carts
//! - Responses are normalized from every known envelope shape
//! - No retries here except the one-shot replay after a token refresh; retry
//!   policy belongs to the caller (see [`crate::retry`])
//!
//! # Example
//!
//! ```rust,ignore
//! use harvest_cart::api::{AddItemInput, CartClient, RequestContext};
//!
//! let client = CartClient::new(&config.api)?;
//! let ctx = RequestContext::new(Locale::English);
//!
//! let cart = client.get_cart(&ctx).await?;
//! let cart = client
//!     .add_item(&ctx, &AddItemInput::new("m1".into(), 2.0, None, &[]))
//!     .await?;
//! ```

mod auth;
mod client;
pub mod normalize;
pub mod types;

pub use auth::AuthTokens;
pub use client::CartClient;
pub use normalize::normalize_cart;
pub use types::*;

use thiserror::Error;

/// Errors that can occur when talking to the cart API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed (connection, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned a non-success status.
    #[error("API error: {status} - {message}")]
    Status { status: u16, message: String },

    /// Request was rejected as unauthenticated and could not be refreshed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limited by the API.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Response body could not be parsed.
    #[error("Failed to parse {context}: {source}")]
    Parse {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Configured base URL cannot carry a path.
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
}

impl ApiError {
    /// HTTP status code associated with this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::Status { status, .. } => Some(*status),
            Self::Unauthorized(_) => Some(401),
            Self::RateLimited(_) => Some(429),
            Self::Parse { .. } | Self::InvalidBaseUrl(_) => None,
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Network failures, 408, 429 and 5xx are transient. Other 4xx responses
    /// and parse failures are not.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Http(e) => e
                .status()
                .map_or(true, |s| s.as_u16() == 408 || s.is_server_error()),
            Self::Status { status, .. } => *status == 408 || *status >= 500,
            Self::RateLimited(_) => true,
            Self::Unauthorized(_) | Self::Parse { .. } | Self::InvalidBaseUrl(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ApiError {
        ApiError::Status {
            status: code,
            message: String::new(),
        }
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::Status {
            status: 422,
            message: "Coupon expired".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 422 - Coupon expired");
        assert_eq!(
            ApiError::RateLimited(3).to_string(),
            "Rate limited, retry after 3 seconds"
        );
    }

    #[test]
    fn test_retriable_statuses() {
        assert!(status(500).is_retriable());
        assert!(status(503).is_retriable());
        assert!(status(408).is_retriable());
        assert!(ApiError::RateLimited(1).is_retriable());

        assert!(!status(400).is_retriable());
        assert!(!status(404).is_retriable());
        assert!(!status(422).is_retriable());
        assert!(!ApiError::Unauthorized("expired".to_string()).is_retriable());
    }

    #[test]
    fn test_status_code() {
        assert_eq!(status(404).status(), Some(404));
        assert_eq!(ApiError::Unauthorized(String::new()).status(), Some(401));
        assert_eq!(ApiError::InvalidBaseUrl(String::new()).status(), None);
    }
}
