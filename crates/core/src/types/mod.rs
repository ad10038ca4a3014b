//! Core types for Harvest.
//!
//! This module provides type-safe wrappers for cart domain concepts.

pub mod id;
pub mod line_key;
pub mod locale;
pub mod price;
pub mod product;

pub use id::*;
pub use line_key::{LineKey, NO_OPTIONS, options_key};
pub use locale::{Locale, UnsupportedLocale};
pub use price::{Cents, CurrencyCode};
pub use product::{OptionPriceMode, OptionSelection, PricingModel, ProductSnapshot};
