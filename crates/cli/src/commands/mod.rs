//! CLI command implementations.

pub mod auth;
pub mod cart;

use thiserror::Error;

use harvest_cart::{CartError, CartSession, HarvestConfig};
use harvest_core::UserId;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Cart operation failed.
    #[error("{}", .0.user_message())]
    Cart(#[from] CartError),

    /// Malformed `--option` value.
    #[error("Invalid option '{0}': expected id:qty:cents or id:qty:cents:set")]
    InvalidOption(String),

    /// Command needs `--user`.
    #[error("This command needs --user")]
    MissingUser,

    /// JSON output failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How to print carts.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// Print JSON instead of a table.
    pub json: bool,
}

/// Build the session and, when `user` is given, sign in.
///
/// Signing in merges whatever is left in the guest cart; the outcome is
/// reported before the command runs.
pub async fn open_session(
    config: &HarvestConfig,
    user: Option<&str>,
    offline: bool,
) -> Result<CartSession, CliError> {
    let session = CartSession::from_config(config)?;

    if offline {
        session.connectivity().set_online(false);
    }

    if let Some(user) = user {
        let tokens = config.credentials.as_ref().map(|c| c.to_tokens());
        if tokens.is_none() {
            tracing::warn!("No HARVEST_ACCESS_TOKEN set, server calls will be anonymous");
        }
        if let Some(outcome) = session.sign_in(UserId::new(user), tokens).await? {
            auth::report_merge(&outcome);
        }
    }

    Ok(session)
}
