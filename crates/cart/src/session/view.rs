//! Display-ready projection of the cart.
//!
//! Both cart modes project into the same [`CartView`], so a UI renders one
//! shape whether the user is signed in or not.

use std::collections::HashSet;

use serde::Serialize;

use harvest_core::quantity::format_quantity_label;
use harvest_core::{Cents, CurrencyCode, Locale, OptionSelection, PricingModel};

use crate::api::{LoyaltyState, ServerCart, ServerCartItem};
use crate::local::LocalCartItem;

/// Prefix of placeholder line IDs created by optimistic adds.
pub(super) const OPTIMISTIC_ID_PREFIX: &str = "optimistic-";

/// Which store backs the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CartMode {
    /// Signed out; lines live on this device.
    Guest,
    /// Signed in; the server cart is authoritative.
    Server,
}

/// A cart line for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLineView {
    /// Line ID to pass back to update/remove.
    pub id: String,
    /// Product ID.
    pub product_id: String,
    /// Branch ID.
    pub branch_id: Option<String>,
    /// Product name.
    pub name: String,
    /// Image URL.
    pub image: Option<String>,
    /// Raw quantity.
    pub quantity: f64,
    /// Localized quantity (e.g. `1.5 kg`).
    pub quantity_label: String,
    /// Formatted unit price.
    pub unit_price: String,
    /// Formatted line total.
    pub line_total: String,
    /// Line total in cents.
    pub line_total_cents: Cents,
    /// Pricing model.
    pub pricing_model: PricingModel,
    /// Option labels (name, else ID), with quantity when above one.
    pub options: Vec<String>,
    /// Whether a mutation for this line is in flight.
    pub is_mutating: bool,
    /// Whether the line exists only as an optimistic placeholder.
    pub is_pending: bool,
}

/// Loyalty-point state for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoyaltyView {
    /// Points held.
    pub points_balance: u64,
    /// Whether points are applied.
    pub points_applied: bool,
    /// Formatted discount from points.
    pub discount: String,
}

/// The whole cart for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartView {
    /// Backing store.
    pub mode: CartMode,
    /// Server cart ID, if any.
    pub cart_id: Option<String>,
    /// Lines.
    pub lines: Vec<CartLineView>,
    /// Badge count: whole units for unit lines, one per weighed line.
    pub item_count: u32,
    /// Subtotal in cents.
    pub subtotal_cents: Cents,
    /// Coupon discount in cents.
    pub discount_cents: Cents,
    /// Shipping fee in cents, once an address is known.
    pub shipping_fee_cents: Option<Cents>,
    /// Grand total in cents.
    pub total_cents: Cents,
    /// Currency of all amounts.
    pub currency: CurrencyCode,
    /// Applied coupon.
    pub coupon_code: Option<String>,
    /// Loyalty points.
    pub loyalty: Option<LoyaltyView>,
    /// Estimated delivery time in minutes.
    pub eta_minutes: Option<u32>,
}

impl CartView {
    /// Project a server cart.
    #[must_use]
    pub fn from_server(cart: &ServerCart, locale: Locale, mutating: &HashSet<String>) -> Self {
        let currency = cart.currency;
        let lines: Vec<CartLineView> = cart
            .items
            .iter()
            .map(|item| server_line(item, currency, locale, mutating))
            .collect();

        Self {
            mode: CartMode::Server,
            cart_id: cart.cart_id.as_ref().map(ToString::to_string),
            item_count: item_count(&lines),
            lines,
            subtotal_cents: cart.subtotal(),
            discount_cents: cart.discount_cents,
            shipping_fee_cents: cart.shipping_fee_cents,
            total_cents: cart.total(),
            currency,
            coupon_code: cart.coupon_code.clone(),
            loyalty: cart
                .loyalty
                .as_ref()
                .map(|l| loyalty_view(l, currency)),
            eta_minutes: cart.eta_minutes,
        }
    }

    /// Project the guest cart.
    #[must_use]
    pub fn from_local(items: &[LocalCartItem], currency: CurrencyCode, locale: Locale) -> Self {
        let lines: Vec<CartLineView> = items
            .iter()
            .map(|item| CartLineView {
                id: item.id.to_string(),
                product_id: item.product_id.to_string(),
                branch_id: item.branch_id.as_ref().map(ToString::to_string),
                name: item.name.clone(),
                image: item.image.clone(),
                quantity: item.quantity,
                quantity_label: format_quantity_label(item.quantity, item.pricing_model, locale),
                unit_price: item.unit_price_cents.display(currency),
                line_total: item.line_total().display(currency),
                line_total_cents: item.line_total(),
                pricing_model: item.pricing_model,
                options: option_labels(&item.options),
                is_mutating: false,
                is_pending: false,
            })
            .collect();

        let subtotal: Cents = lines.iter().map(|l| l.line_total_cents).sum();

        Self {
            mode: CartMode::Guest,
            cart_id: None,
            item_count: item_count(&lines),
            lines,
            subtotal_cents: subtotal,
            discount_cents: Cents::ZERO,
            shipping_fee_cents: None,
            total_cents: subtotal,
            currency,
            coupon_code: None,
            loyalty: None,
            eta_minutes: None,
        }
    }

    /// An empty cart.
    #[must_use]
    pub fn empty(mode: CartMode, currency: CurrencyCode) -> Self {
        Self {
            mode,
            cart_id: None,
            lines: Vec::new(),
            item_count: 0,
            subtotal_cents: Cents::ZERO,
            discount_cents: Cents::ZERO,
            shipping_fee_cents: None,
            total_cents: Cents::ZERO,
            currency,
            coupon_code: None,
            loyalty: None,
            eta_minutes: None,
        }
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Formatted subtotal.
    #[must_use]
    pub fn subtotal(&self) -> String {
        self.subtotal_cents.display(self.currency)
    }

    /// Formatted discount.
    #[must_use]
    pub fn discount(&self) -> String {
        self.discount_cents.display(self.currency)
    }

    /// Formatted shipping fee.
    #[must_use]
    pub fn shipping_fee(&self) -> Option<String> {
        self.shipping_fee_cents.map(|c| c.display(self.currency))
    }

    /// Formatted total.
    #[must_use]
    pub fn total(&self) -> String {
        self.total_cents.display(self.currency)
    }

    /// Find a line by ID.
    #[must_use]
    pub fn line(&self, id: &str) -> Option<&CartLineView> {
        self.lines.iter().find(|l| l.id == id)
    }
}

fn server_line(
    item: &ServerCartItem,
    currency: CurrencyCode,
    locale: Locale,
    mutating: &HashSet<String>,
) -> CartLineView {
    let id = item.id.to_string();
    let line_key = item.line_key();
    CartLineView {
        is_mutating: mutating.contains(&id) || mutating.contains(line_key.as_str()),
        is_pending: id.starts_with(OPTIMISTIC_ID_PREFIX),
        id,
        product_id: item.product_id.to_string(),
        branch_id: item.branch_id.as_ref().map(ToString::to_string),
        name: item
            .name
            .clone()
            .unwrap_or_else(|| item.product_id.to_string()),
        image: item.image.clone(),
        quantity: item.quantity,
        quantity_label: format_quantity_label(item.quantity, item.pricing_model, locale),
        unit_price: item.unit_price_cents.display(currency),
        line_total: item.line_total().display(currency),
        line_total_cents: item.line_total(),
        pricing_model: item.pricing_model,
        options: option_labels(&item.options),
    }
}

fn option_labels(options: &[OptionSelection]) -> Vec<String> {
    options
        .iter()
        .map(|o| {
            let label = o.name.clone().unwrap_or_else(|| o.option_id.to_string());
            if o.quantity > 1.0 || o.is_fractional() {
                format!("{label} ×{}", harvest_core::quantity::format_quantity_key(o.quantity, 1.0))
            } else {
                label
            }
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn item_count(lines: &[CartLineView]) -> u32 {
    lines
        .iter()
        .map(|l| match l.pricing_model {
            PricingModel::Weight => 1,
            PricingModel::Unit => l.quantity.round().max(0.0) as u32,
        })
        .sum()
}

fn loyalty_view(loyalty: &LoyaltyState, currency: CurrencyCode) -> LoyaltyView {
    LoyaltyView {
        points_balance: loyalty.points_balance,
        points_applied: loyalty.points_applied,
        discount: loyalty.discount_cents.display(currency),
    }
}
