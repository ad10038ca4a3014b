//! Sign-in and sign-out commands.
//!
//! # Environment Variables
//!
//! - `HARVEST_ACCESS_TOKEN` - Bearer token for `--user`
//! - `HARVEST_REFRESH_TOKEN` - Refresh token for that user

use harvest_cart::{CartMode, CartSession, MergeOutcome};

use super::{CliError, Output};

/// Print the merge outcome and send partial failures to Sentry.
#[allow(clippy::print_stdout)]
pub fn report_merge(outcome: &MergeOutcome) {
    println!("Merged {} guest line(s) into your cart", outcome.merged);

    if let Some(error) = &outcome.error {
        sentry::capture_error(error);
        println!("{error}:");
        for failure in &error.failures {
            println!("  {} ({})", failure.product_id, failure.message);
        }
    }
}

/// Sign in (done by `--user`) and print the resulting cart.
pub async fn login(session: &CartSession, output: Output) -> Result<(), CliError> {
    if session.mode().await != CartMode::Server {
        return Err(CliError::MissingUser);
    }

    if let Some(user) = session.user().await {
        tracing::info!(user_id = %user, "Signed in");
    }
    super::cart::show(session, output).await
}

/// Sign out, dropping tokens and the guest cart.
#[allow(clippy::print_stdout)]
pub async fn logout(session: &CartSession) -> Result<(), CliError> {
    session.sign_out().await?;
    println!("Signed out; guest cart cleared");
    Ok(())
}
