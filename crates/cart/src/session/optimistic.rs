//! Optimistic patches applied to the cached server cart.
//!
//! Each patch predicts what the server will answer so the UI updates
//! immediately. Predictions are thrown away when the mutation settles and the
//! cart is refetched, so they only need to be plausible, not exact: coupon
//! discounts, shipping and loyalty are left for the server to fill in.

use uuid::Uuid;

use harvest_core::quantity::{normalize_line_quantity, round_qty};
use harvest_core::{CartItemId, Cents, LineKey, OptionSelection, ProductSnapshot};

use super::view::OPTIMISTIC_ID_PREFIX;
use crate::api::{ServerCart, ServerCartItem};

/// Add `qty` of a product, growing a matching line or appending a placeholder.
pub fn add_line(cart: &mut ServerCart, product: &ProductSnapshot, qty: f64, options: &[OptionSelection]) {
    let key = LineKey::new(&product.id, product.branch_id.as_ref(), options);
    let fractional = product.is_fractional_with(options);

    if let Some(item) = cart.items.iter_mut().find(|i| i.line_key() == key) {
        item.quantity = normalize_line_quantity(item.quantity + qty, fractional);
        item.line_total_cents = None;
    } else {
        cart.items.push(ServerCartItem {
            id: CartItemId::new(format!("{OPTIMISTIC_ID_PREFIX}{}", Uuid::new_v4())),
            product_id: product.id.clone(),
            branch_id: product.branch_id.clone(),
            provider_id: product.provider_id.clone(),
            name: Some(product.name.clone()),
            image: product.image.clone(),
            quantity: normalize_line_quantity(qty, fractional),
            unit_price_cents: product.unit_price_with(options),
            line_total_cents: None,
            pricing_model: product.pricing_model,
            options: options.to_vec(),
        });
    }

    recompute_totals(cart);
}

/// Set a line's quantity; zero or less removes it.
pub fn set_quantity(cart: &mut ServerCart, item_id: &str, qty: f64) {
    if qty <= 0.0 {
        remove_line(cart, item_id);
        return;
    }

    if let Some(item) = cart.items.iter_mut().find(|i| i.id.as_str() == item_id) {
        item.quantity = round_qty(qty);
        item.line_total_cents = None;
    }
    recompute_totals(cart);
}

/// Drop a line.
pub fn remove_line(cart: &mut ServerCart, item_id: &str) {
    cart.items.retain(|i| i.id.as_str() != item_id);
    recompute_totals(cart);
}

/// Show a coupon as applied; the discount arrives with the server response.
pub fn apply_coupon(cart: &mut ServerCart, code: &str) {
    cart.coupon_code = Some(code.to_string());
}

/// Drop the coupon and its discount.
pub fn remove_coupon(cart: &mut ServerCart) {
    cart.coupon_code = None;
    cart.discount_cents = Cents::ZERO;
    recompute_totals(cart);
}

/// Empty the cart.
pub fn clear(cart: &mut ServerCart) {
    cart.items.clear();
    cart.discount_cents = Cents::ZERO;
    recompute_totals(cart);
}

fn recompute_totals(cart: &mut ServerCart) {
    cart.subtotal_cents = Some(cart.items.iter().map(ServerCartItem::line_total).sum());
    // Fall back to `ServerCart::total` arithmetic until the server answers
    cart.total_cents = None;
}
