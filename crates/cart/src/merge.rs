//! Guest cart merge at sign-in.
//!
//! Walks the guest cart and pushes each line into the server cart: a line
//! whose key already exists on the server has its quantity raised by the
//! guest quantity, anything else is added. The guest cart is cleared
//! afterwards whatever the per-line outcome, so a half-merged cart is never
//! merged twice. Per-line failures are reported, not retried.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use harvest_core::quantity::round_qty;
use harvest_core::{CartItemId, LineKey, ProductId};

use crate::api::{AddItemInput, CartClient, RequestContext, ServerCart};
use crate::local::{LocalCartItem, SharedLocalCart, StorageError};

/// A guest line that could not be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFailure {
    /// Product on the line.
    pub product_id: ProductId,
    /// Guest line key.
    pub line_key: LineKey,
    /// Error reported by the API.
    pub message: String,
}

/// Some guest lines could not be merged into the server cart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} of {attempted} guest cart lines could not be merged", failures.len())]
pub struct MergeError {
    /// Number of guest lines processed.
    pub attempted: usize,
    /// Lines that failed.
    pub failures: Vec<MergeFailure>,
}

/// Result of a merge run.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Server cart after the merge, if it could be fetched.
    pub cart: Option<ServerCart>,
    /// Number of guest lines merged successfully.
    pub merged: usize,
    /// Per-line failures, if any.
    pub error: Option<MergeError>,
}

impl MergeOutcome {
    /// Whether every guest line made it into the server cart.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Merge the guest cart into the server cart.
///
/// An empty guest cart never touches the server cart; the current server
/// cart is fetched and returned as-is.
///
/// # Errors
///
/// Returns error only if the guest cart lock is poisoned. API failures are
/// reported through [`MergeOutcome::error`].
#[instrument(skip_all)]
pub async fn merge_guest_cart(
    client: &CartClient,
    ctx: &RequestContext,
    local: &SharedLocalCart,
) -> Result<MergeOutcome, StorageError> {
    let guest_items = local.snapshot()?;

    if guest_items.is_empty() {
        debug!("Guest cart empty, nothing to merge");
        return Ok(MergeOutcome {
            cart: fetch_preview(client, ctx).await,
            ..MergeOutcome::default()
        });
    }

    let server = match client.get_cart(ctx).await {
        Ok(cart) => cart,
        Err(e) => {
            warn!(error = %e, "Could not fetch server cart before merge, assuming empty");
            ServerCart::default()
        }
    };

    let index: HashMap<LineKey, (CartItemId, f64)> = server
        .items
        .iter()
        .map(|item| (item.line_key(), (item.id.clone(), item.quantity)))
        .collect();

    let mut merged = 0;
    let mut failures = Vec::new();
    let mut last_cart = None;

    for item in &guest_items {
        match merge_line(client, ctx, item, index.get(&item.id)).await {
            Ok(cart) => {
                merged += 1;
                last_cart = Some(cart);
            }
            Err(message) => {
                warn!(
                    product_id = %item.product_id,
                    line_key = %item.id,
                    error = %message,
                    "Failed to merge guest cart line"
                );
                failures.push(MergeFailure {
                    product_id: item.product_id.clone(),
                    line_key: item.id.clone(),
                    message,
                });
            }
        }
    }

    if let Err(e) = local.update(|store| store.clear()) {
        warn!(error = %e, "Failed to clear guest cart after merge");
    }

    info!(
        attempted = guest_items.len(),
        merged,
        failed = failures.len(),
        "Guest cart merged"
    );

    let cart = fetch_preview(client, ctx).await.or(last_cart);
    let error = (!failures.is_empty()).then(|| MergeError {
        attempted: guest_items.len(),
        failures,
    });

    Ok(MergeOutcome {
        cart,
        merged,
        error,
    })
}

async fn merge_line(
    client: &CartClient,
    ctx: &RequestContext,
    item: &LocalCartItem,
    existing: Option<&(CartItemId, f64)>,
) -> Result<ServerCart, String> {
    let result = match existing {
        Some((server_id, server_qty)) => {
            let qty = round_qty(server_qty + item.quantity);
            debug!(line_key = %item.id, qty, "Raising existing server line");
            client.update_item(ctx, server_id, qty).await
        }
        None => {
            let input = AddItemInput::new(
                item.product_id.clone(),
                item.quantity,
                item.branch_id.clone(),
                &item.options,
            );
            client.add_item(ctx, &input).await
        }
    };

    result.map_err(|e| e.to_string())
}

async fn fetch_preview(client: &CartClient, ctx: &RequestContext) -> Option<ServerCart> {
    match client.get_cart(ctx).await {
        Ok(cart) => Some(cart),
        Err(e) => {
            warn!(error = %e, "Could not fetch server cart after merge");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_error_display() {
        let err = MergeError {
            attempted: 3,
            failures: vec![MergeFailure {
                product_id: ProductId::new("m1"),
                line_key: LineKey::new(&ProductId::new("m1"), None, &[]),
                message: "out of stock".to_string(),
            }],
        };
        assert_eq!(
            err.to_string(),
            "1 of 3 guest cart lines could not be merged"
        );
    }

    #[test]
    fn test_outcome_completeness() {
        assert!(MergeOutcome::default().is_complete());
        let partial = MergeOutcome {
            error: Some(MergeError {
                attempted: 1,
                failures: Vec::new(),
            }),
            ..MergeOutcome::default()
        };
        assert!(!partial.is_complete());
    }
}
