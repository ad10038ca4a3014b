//! Wire types for the cart API.
//!
//! These types describe the cart after envelope normalization (see
//! [`super::normalize`]). Every field the backend may omit carries a serde
//! default so partially-populated carts still deserialize.

use serde::{Deserialize, Serialize};

use harvest_core::quantity::round_qty;
use harvest_core::{
    AddressId, BranchId, CartId, CartItemId, Cents, CurrencyCode, LineKey, Locale, OptionId,
    OptionSelection, PricingModel, ProductId, ProviderId, ZoneId,
};

// =============================================================================
// Request Context
// =============================================================================

/// Parameters sent with every cart call.
///
/// Also used as the query-cache key: switching language or delivery address
/// selects a different cached cart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RequestContext {
    /// Language for product names and messages.
    pub locale: Locale,
    /// Delivery address; the server derives shipping and ETA from it.
    pub address_id: Option<AddressId>,
}

impl RequestContext {
    /// Create a context for a language with no delivery address.
    #[must_use]
    pub const fn new(locale: Locale) -> Self {
        Self {
            locale,
            address_id: None,
        }
    }

    /// Set the delivery address.
    #[must_use]
    pub fn with_address(mut self, address_id: impl Into<AddressId>) -> Self {
        self.address_id = Some(address_id.into());
        self
    }
}

// =============================================================================
// Cart Types
// =============================================================================

/// Delivery details nested under `delivery` by some backend versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryInfo {
    /// Estimated delivery time in minutes.
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    /// Address the estimate was computed for.
    #[serde(default)]
    pub address_id: Option<AddressId>,
    /// Delivery zone of that address.
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
}

/// Coupon details nested under `coupon`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponInfo {
    /// Coupon code.
    #[serde(default)]
    pub code: Option<String>,
}

/// Loyalty-point state of the cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyState {
    /// Points the customer holds.
    #[serde(default)]
    pub points_balance: u64,
    /// Whether points are applied to this cart.
    #[serde(default)]
    pub points_applied: bool,
    /// Discount the applied points are worth.
    #[serde(default)]
    pub discount_cents: Cents,
}

/// A line in the server cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCartItem {
    /// Cart line ID.
    pub id: CartItemId,
    /// Product on this line.
    pub product_id: ProductId,
    /// Branch the product is sold from.
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    /// Provider of the product.
    #[serde(default)]
    pub provider_id: Option<ProviderId>,
    /// Product name in the requested language.
    #[serde(default)]
    pub name: Option<String>,
    /// Image URL.
    #[serde(default)]
    pub image: Option<String>,
    /// Quantity on the line.
    #[serde(rename = "qty", alias = "quantity")]
    pub quantity: f64,
    /// Unit price including add-ons.
    #[serde(default)]
    pub unit_price_cents: Cents,
    /// Line total as computed by the server.
    #[serde(default)]
    pub line_total_cents: Option<Cents>,
    /// Pricing model.
    #[serde(default)]
    pub pricing_model: PricingModel,
    /// Selected options.
    #[serde(default)]
    pub options: Vec<OptionSelection>,
}

impl ServerCartItem {
    /// Composite key of this line, comparable with guest cart keys.
    #[must_use]
    pub fn line_key(&self) -> LineKey {
        LineKey::new(&self.product_id, self.branch_id.as_ref(), &self.options)
    }

    /// Whether this line holds fractional quantities.
    #[must_use]
    pub fn allows_fractional(&self) -> bool {
        self.pricing_model.is_weight()
            || self.options.iter().any(OptionSelection::is_fractional)
            || harvest_core::quantity::is_fractional(self.quantity)
    }

    /// Line total, preferring the server's figure.
    #[must_use]
    pub fn line_total(&self) -> Cents {
        self.line_total_cents
            .unwrap_or_else(|| self.unit_price_cents.times(self.quantity))
    }
}

/// The authoritative server cart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCart {
    /// Cart ID (absent before the first item is added).
    #[serde(default)]
    pub cart_id: Option<CartId>,
    /// Cart lines.
    #[serde(default)]
    pub items: Vec<ServerCartItem>,
    /// Sum of line totals as computed by the server.
    #[serde(default)]
    pub subtotal_cents: Option<Cents>,
    /// Coupon discount.
    #[serde(default)]
    pub discount_cents: Cents,
    /// Shipping fee for the selected address.
    #[serde(default)]
    pub shipping_fee_cents: Option<Cents>,
    /// Grand total as computed by the server.
    #[serde(default)]
    pub total_cents: Option<Cents>,
    /// Currency of all amounts.
    #[serde(default)]
    pub currency: CurrencyCode,
    /// Applied coupon code.
    #[serde(default)]
    pub coupon_code: Option<String>,
    /// Estimated delivery time in minutes.
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    /// Delivery address the cart was priced for.
    #[serde(default)]
    pub address_id: Option<AddressId>,
    /// Delivery zone.
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
    /// Loyalty-point state.
    #[serde(default)]
    pub loyalty: Option<LoyaltyState>,
    /// Nested delivery block (folded into the top-level fields).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryInfo>,
    /// Nested coupon block (folded into `coupon_code`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon: Option<CouponInfo>,
}

impl ServerCart {
    /// Find a line by its server ID.
    #[must_use]
    pub fn item(&self, id: &str) -> Option<&ServerCartItem> {
        self.items.iter().find(|i| i.id.as_str() == id)
    }

    /// Subtotal, preferring the server's figure over the sum of line totals.
    #[must_use]
    pub fn subtotal(&self) -> Cents {
        self.subtotal_cents
            .unwrap_or_else(|| self.items.iter().map(ServerCartItem::line_total).sum())
    }

    /// Grand total, falling back to `subtotal - discount + shipping`.
    #[must_use]
    pub fn total(&self) -> Cents {
        self.total_cents.unwrap_or_else(|| {
            let loyalty = self
                .loyalty
                .as_ref()
                .filter(|l| l.points_applied)
                .map_or(Cents::ZERO, |l| l.discount_cents);
            self.subtotal() - self.discount_cents - loyalty
                + self.shipping_fee_cents.unwrap_or_default()
        })
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Request Bodies
// =============================================================================

/// Option payload for add-to-cart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionInput {
    /// Option ID.
    pub option_id: OptionId,
    /// Option quantity.
    pub qty: f64,
}

/// Body of `POST /cart/items`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemInput {
    /// Product to add.
    pub product_id: ProductId,
    /// Quantity to add.
    pub qty: f64,
    /// Branch to buy from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<BranchId>,
    /// Selected options.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionInput>,
}

impl AddItemInput {
    /// Build an add request from a product, quantity and normalized options.
    #[must_use]
    pub fn new(
        product_id: ProductId,
        qty: f64,
        branch_id: Option<BranchId>,
        options: &[OptionSelection],
    ) -> Self {
        Self {
            product_id,
            qty: round_qty(qty),
            branch_id,
            options: options
                .iter()
                .map(|o| OptionInput {
                    option_id: o.option_id.clone(),
                    qty: o.quantity,
                })
                .collect(),
        }
    }
}

/// Body of `PATCH /cart/items/:id`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UpdateItemInput {
    /// New quantity.
    pub qty: f64,
}

/// Body of `POST /cart/apply-coupon`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCouponInput {
    /// Coupon code to apply.
    pub coupon_code: String,
}
