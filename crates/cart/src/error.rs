//! Unified error type for cart operations.
//!
//! Every public [`crate::session::CartSession`] operation returns
//! `Result<T, CartError>`. Layer errors convert in with `?`; UI shells show
//! [`CartError::user_message`] rather than the `Display` text.

use thiserror::Error;

use crate::api::ApiError;
use crate::local::StorageError;
use crate::merge::MergeError;

/// Message shown when a server-mode mutation is attempted offline.
pub const OFFLINE_MESSAGE: &str =
    "You are offline. Reconnect to update your cart.";

/// Cart-level error type.
#[derive(Debug, Error)]
pub enum CartError {
    /// Input rejected before any network call.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Server-mode mutation attempted while offline.
    #[error("{OFFLINE_MESSAGE}")]
    Offline,

    /// Operation requires a signed-in user.
    #[error("Sign in required: {0}")]
    AuthRequired(String),

    /// Cart line does not exist.
    #[error("Cart item not found: {0}")]
    ItemNotFound(String),

    /// Cart API call failed.
    #[error("Cart API error: {0}")]
    Api(#[from] ApiError),

    /// Guest cart persistence failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Guest cart merge partially failed.
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),
}

impl CartError {
    /// Text suitable for a toast; never exposes transport details.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Offline => OFFLINE_MESSAGE.to_string(),
            Self::AuthRequired(_) => "Please sign in to continue.".to_string(),
            Self::ItemNotFound(_) => "That item is no longer in your cart.".to_string(),
            Self::Api(err) => match err {
                ApiError::Status { status, message } if (400..500).contains(status) => {
                    if message.trim().is_empty() {
                        "Your cart could not be updated.".to_string()
                    } else {
                        message.clone()
                    }
                }
                ApiError::Unauthorized(_) => {
                    "Your session has expired. Please sign in again.".to_string()
                }
                ApiError::RateLimited(_) => {
                    "Too many requests. Please try again in a moment.".to_string()
                }
                _ => "We couldn't reach the store. Please try again.".to_string(),
            },
            Self::Storage(_) => "Your cart could not be saved on this device.".to_string(),
            Self::Merge(_) => {
                "Some items from your guest cart could not be added.".to_string()
            }
        }
    }

    /// Whether the failure was the offline guard.
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;
