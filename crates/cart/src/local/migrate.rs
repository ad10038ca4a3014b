//! Schema migration for persisted guest carts.
//!
//! Version history:
//! - `0`: unversioned blob, lines keyed by product only, price under `price`
//! - `1`: versioned snapshot, lines keyed by `product|branch`, no options
//! - `2`: lines keyed by `product|branch|options` and carrying options
//!
//! Pre-options carts are upgraded by re-deriving each key with an empty
//! option list. Lines that collide after re-keying are folded together.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use harvest_core::quantity::normalize_line_quantity;
use harvest_core::{BranchId, Cents, LineKey, PricingModel, ProductId, ProviderId};

use super::StorageError;
use super::{LocalCartItem, LocalCartState};

/// Snapshot version written by this build.
pub const CURRENT_VERSION: u32 = 2;

/// Upgrade a persisted cart state written at `from_version`.
///
/// # Errors
///
/// Returns `StorageError::UnsupportedVersion` for snapshots newer than
/// [`CURRENT_VERSION`] and `StorageError::Json` if the state does not match
/// the schema of its version.
pub fn migrate(state: Value, from_version: u32) -> Result<LocalCartState, StorageError> {
    match from_version {
        CURRENT_VERSION => Ok(serde_json::from_value(state)?),
        0 | 1 => {
            let legacy: LegacyCartState = serde_json::from_value(state)?;
            debug!(
                from_version,
                lines = legacy.items.len(),
                "Migrating guest cart to options-aware keys"
            );
            Ok(rekey(legacy.items))
        }
        found => Err(StorageError::UnsupportedVersion {
            found,
            current: CURRENT_VERSION,
        }),
    }
}

#[derive(Deserialize)]
struct LegacyCartState {
    #[serde(default)]
    items: Vec<LegacyCartItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyCartItem {
    product_id: ProductId,
    #[serde(default)]
    branch_id: Option<BranchId>,
    #[serde(default)]
    provider_id: Option<ProviderId>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(alias = "price", default)]
    unit_price_cents: Cents,
    #[serde(default)]
    pricing_model: PricingModel,
    #[serde(alias = "qty")]
    quantity: f64,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    stock: Option<f64>,
}

fn rekey(items: Vec<LegacyCartItem>) -> LocalCartState {
    let mut state = LocalCartState::default();

    for legacy in items {
        if legacy.product_id.is_blank() || !legacy.quantity.is_finite() || legacy.quantity <= 0.0
        {
            continue;
        }

        let fractional = legacy.pricing_model.is_weight();
        let id = LineKey::new(&legacy.product_id, legacy.branch_id.as_ref(), &[]);

        if let Some(existing) = state.items.iter_mut().find(|i| i.id == id) {
            existing.quantity =
                normalize_line_quantity(existing.quantity + legacy.quantity, fractional);
            continue;
        }

        state.items.push(LocalCartItem {
            id,
            product_id: legacy.product_id,
            branch_id: legacy.branch_id,
            provider_id: legacy.provider_id,
            name: legacy.name,
            image: legacy.image,
            unit_price_cents: legacy.unit_price_cents,
            pricing_model: legacy.pricing_model,
            quantity: normalize_line_quantity(legacy.quantity, fractional),
            options: Vec::new(),
            category: legacy.category,
            stock: legacy.stock,
        });
    }

    state
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_v1_rekeys_with_empty_options() {
        let state = migrate(
            json!({
                "items": [
                    {"id": "m1|-", "productId": "m1", "name": "Milk", "price": 350, "quantity": 2},
                    {"id": "a1|b2", "productId": "a1", "branchId": "b2", "name": "Apples",
                     "unitPriceCents": 400, "pricingModel": "weight", "quantity": 1.25}
                ]
            }),
            1,
        )
        .unwrap();

        assert_eq!(state.items.len(), 2);
        assert_eq!(state.items[0].id.as_str(), "m1|-|no-options");
        assert_eq!(state.items[0].unit_price_cents, Cents::new(350));
        assert_eq!(state.items[1].id.as_str(), "a1|b2|no-options");
        assert!((state.items[1].quantity - 1.25).abs() < f64::EPSILON);
        assert!(state.items.iter().all(|i| i.options.is_empty()));
    }

    #[test]
    fn test_v0_folds_collisions() {
        let state = migrate(
            json!({
                "items": [
                    {"productId": "m1", "name": "Milk", "price": 350, "qty": 2},
                    {"productId": "m1", "name": "Milk", "price": 350, "qty": 3}
                ]
            }),
            0,
        )
        .unwrap();

        assert_eq!(state.items.len(), 1);
        assert!((state.items[0].quantity - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_legacy_drops_unusable_lines() {
        let state = migrate(
            json!({
                "items": [
                    {"productId": "", "quantity": 1},
                    {"productId": "m1", "quantity": 0}
                ]
            }),
            1,
        )
        .unwrap();
        assert!(state.items.is_empty());
    }

    #[test]
    fn test_current_version_passes_through() {
        let state = migrate(json!({"items": []}), CURRENT_VERSION).unwrap();
        assert!(state.items.is_empty());
    }

    #[test]
    fn test_future_version_is_rejected() {
        let err = migrate(json!({"items": []}), CURRENT_VERSION + 1).unwrap_err();
        assert!(matches!(
            err,
            StorageError::UnsupportedVersion { found: 3, current: 2 }
        ));
    }
}
