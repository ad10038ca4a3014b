//! Product data captured when an item goes into the cart.

use serde::{Deserialize, Serialize};

use super::{BranchId, Cents, OptionId, ProductId, ProviderId};
use crate::quantity::{is_fractional, round_qty};

/// How a product is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PricingModel {
    /// Sold per piece; quantities are whole numbers.
    #[default]
    Unit,
    /// Sold by weight; quantities may be fractional (kilograms).
    Weight,
}

impl PricingModel {
    /// Whether this pricing model allows fractional quantities.
    #[must_use]
    pub const fn is_weight(self) -> bool {
        matches!(self, Self::Weight)
    }
}

/// How an option's price combines with the product price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionPriceMode {
    /// Added on top of the base price, per option unit.
    #[default]
    Add,
    /// Replaces the product's own price.
    Set,
}

/// A selected product option (e.g. "extra cheese ×2", "500 g pack").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSelection {
    /// Option ID.
    pub option_id: OptionId,
    /// Display name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Selected quantity of this option.
    #[serde(rename = "qty", alias = "quantity")]
    pub quantity: f64,
    /// Price contribution per option unit.
    #[serde(default)]
    pub price_cents: Cents,
    /// Whether the price is an add-on or a base override.
    #[serde(default)]
    pub price_mode: OptionPriceMode,
}

impl OptionSelection {
    /// Create an add-on option selection.
    #[must_use]
    pub fn add_on(option_id: impl Into<OptionId>, quantity: f64, price_cents: i64) -> Self {
        Self {
            option_id: option_id.into(),
            name: None,
            quantity,
            price_cents: Cents::new(price_cents),
            price_mode: OptionPriceMode::Add,
        }
    }

    /// Create a base-price override option selection.
    #[must_use]
    pub fn set_price(option_id: impl Into<OptionId>, quantity: f64, price_cents: i64) -> Self {
        Self {
            price_mode: OptionPriceMode::Set,
            ..Self::add_on(option_id, quantity, price_cents)
        }
    }

    /// Drop unusable selections and round the rest.
    ///
    /// Entries with a blank option ID or a non-positive (or non-finite)
    /// quantity are removed; remaining quantities are rounded to the standard
    /// precision.
    #[must_use]
    pub fn normalize_all(options: &[Self]) -> Vec<Self> {
        options
            .iter()
            .filter(|o| !o.option_id.is_blank() && o.quantity.is_finite() && o.quantity > 0.0)
            .map(|o| Self {
                quantity: round_qty(o.quantity),
                ..o.clone()
            })
            .collect()
    }

    /// Whether this selection forces fractional line quantities.
    #[must_use]
    pub fn is_fractional(&self) -> bool {
        is_fractional(self.quantity)
    }
}

/// The product fields the cart needs at add time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    /// Product ID.
    pub id: ProductId,
    /// Branch (store) the product is sold from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<BranchId>,
    /// Provider (merchant) of the product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
    /// Display name.
    pub name: String,
    /// Image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Regular price.
    pub price_cents: Cents,
    /// Sale price, if discounted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_price_cents: Option<Cents>,
    /// Pricing model.
    #[serde(default)]
    pub pricing_model: PricingModel,
    /// Category name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Units in stock, when the catalog reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<f64>,
}

impl ProductSnapshot {
    /// Create a unit-priced product snapshot.
    #[must_use]
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price_cents: i64) -> Self {
        Self {
            id: id.into(),
            branch_id: None,
            provider_id: None,
            name: name.into(),
            image: None,
            price_cents: Cents::new(price_cents),
            sale_price_cents: None,
            pricing_model: PricingModel::Unit,
            category: None,
            stock: None,
        }
    }

    /// Set the branch.
    #[must_use]
    pub fn with_branch(mut self, branch_id: impl Into<BranchId>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    /// Set the sale price.
    #[must_use]
    pub const fn with_sale_price(mut self, sale_price_cents: i64) -> Self {
        self.sale_price_cents = Some(Cents::new(sale_price_cents));
        self
    }

    /// Mark the product as sold by weight.
    #[must_use]
    pub const fn by_weight(mut self) -> Self {
        self.pricing_model = PricingModel::Weight;
        self
    }

    /// Effective unit price for the given (normalized) option selections.
    ///
    /// The base is the first `SET` option's price, else the sale price, else
    /// the regular price. Add-on options contribute `price × quantity`.
    #[must_use]
    pub fn unit_price_with(&self, options: &[OptionSelection]) -> Cents {
        let base = options
            .iter()
            .find(|o| o.price_mode == OptionPriceMode::Set)
            .map(|o| o.price_cents)
            .or(self.sale_price_cents)
            .unwrap_or(self.price_cents);

        let add_ons: Cents = options
            .iter()
            .filter(|o| o.price_mode == OptionPriceMode::Add)
            .map(|o| o.price_cents.times(o.quantity))
            .sum();

        base + add_ons
    }

    /// Whether lines of this product (with these options) hold fractional quantities.
    #[must_use]
    pub fn is_fractional_with(&self, options: &[OptionSelection]) -> bool {
        self.pricing_model.is_weight() || options.iter().any(OptionSelection::is_fractional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_drops_invalid_options() {
        let options = vec![
            OptionSelection::add_on("", 1.0, 50),
            OptionSelection::add_on("cheese", 0.0, 50),
            OptionSelection::add_on("sauce", -1.0, 50),
            OptionSelection::add_on("olives", 1.000_04, 25),
        ];
        let normalized = OptionSelection::normalize_all(&options);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].option_id.as_str(), "olives");
        assert!((normalized[0].quantity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unit_price_prefers_set_then_sale_then_price() {
        let product = ProductSnapshot::new("p1", "Pizza", 1000).with_sale_price(800);
        assert_eq!(product.unit_price_with(&[]), Cents::new(800));

        let options = vec![
            OptionSelection::set_price("large", 1.0, 1400),
            OptionSelection::add_on("cheese", 2.0, 150),
        ];
        assert_eq!(product.unit_price_with(&options), Cents::new(1700));

        let plain = ProductSnapshot::new("p2", "Bread", 250);
        assert_eq!(
            plain.unit_price_with(&[OptionSelection::add_on("seeds", 1.0, 40)]),
            Cents::new(290)
        );
    }

    #[test]
    fn test_is_fractional_with() {
        let apples = ProductSnapshot::new("a1", "Apples", 400).by_weight();
        assert!(apples.is_fractional_with(&[]));

        let cheese = ProductSnapshot::new("c1", "Cheese", 900);
        assert!(!cheese.is_fractional_with(&[]));
        assert!(cheese.is_fractional_with(&[OptionSelection::add_on("slice", 0.5, 0)]));
    }
}
