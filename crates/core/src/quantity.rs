//! Quantity normalization rules shared by the local and server carts.
//!
//! Weight-priced groceries are sold in fractional quantities (e.g. 1.25 kg),
//! everything else in whole units. Quantities are rounded to
//! [`QUANTITY_PRECISION`] decimal places before they are stored or compared so
//! repeated `0.1 + 0.2` style additions never accumulate binary noise.

use crate::types::{Locale, PricingModel};

/// Decimal places kept for fractional quantities.
pub const QUANTITY_PRECISION: u32 = 3;

/// Largest quantity a single cart line may hold.
pub const MAX_LINE_QUANTITY: f64 = 99.0;

/// Tolerance used to decide whether a value has a fractional part.
pub const FRACTION_EPSILON: f64 = 1e-6;

/// Clamp a raw quantity into the non-negative range.
///
/// Returns `fallback` when `qty` is NaN or infinite and `0.0` when it is
/// negative. There is no upper bound here; callers apply
/// [`MAX_LINE_QUANTITY`] themselves.
#[must_use]
pub fn clamp_quantity(qty: f64, fallback: f64) -> f64 {
    if !qty.is_finite() {
        return fallback;
    }
    if qty < 0.0 { 0.0 } else { qty }
}

/// Round `qty` to `precision` decimal places.
#[must_use]
pub fn round_quantity(qty: f64, precision: u32) -> f64 {
    if !qty.is_finite() {
        return qty;
    }
    let factor = 10_f64.powi(i32::try_from(precision).unwrap_or(i32::MAX));
    // `+ 0.0` folds negative zero into positive zero
    (qty * factor).round() / factor + 0.0
}

/// Round `qty` to the standard [`QUANTITY_PRECISION`].
#[must_use]
pub fn round_qty(qty: f64) -> f64 {
    round_quantity(qty, QUANTITY_PRECISION)
}

/// Whether `qty` carries a meaningful fractional part.
#[must_use]
pub fn is_fractional(qty: f64) -> bool {
    qty.is_finite() && (qty - qty.round()).abs() > FRACTION_EPSILON
}

/// Canonical string form of a quantity for composite keys.
///
/// The value is clamped (see [`clamp_quantity`]) and rounded first, so `2`,
/// `2.0` and `2.0000001` all produce `"2"`. Not intended for display.
#[must_use]
pub fn format_quantity_key(qty: f64, fallback: f64) -> String {
    let value = round_qty(clamp_quantity(qty, fallback));
    trim_decimal(&format!("{value:.3}"))
}

/// Normalize a line quantity for storage.
///
/// Fractional lines keep [`QUANTITY_PRECISION`] decimals and are clamped to
/// `[0, 99]`; unit lines are rounded to whole numbers and clamped to `[1, 99]`.
#[must_use]
pub fn normalize_line_quantity(qty: f64, fractional: bool) -> f64 {
    if fractional {
        round_qty(qty).clamp(0.0, MAX_LINE_QUANTITY)
    } else {
        qty.round().clamp(1.0, MAX_LINE_QUANTITY)
    }
}

/// Human-readable quantity label for the given locale.
///
/// Whole quantities render without decimals, fractional ones with up to three.
/// Weight-priced lines get a kilogram suffix.
#[must_use]
pub fn format_quantity_label(qty: f64, pricing: PricingModel, locale: Locale) -> String {
    let value = round_qty(clamp_quantity(qty, 0.0));
    let plain = trim_decimal(&format!("{value:.3}"));

    let localized: String = plain
        .chars()
        .map(|c| match c {
            '.' => locale.decimal_separator(),
            d if d.is_ascii_digit() => locale.digit(d),
            other => other,
        })
        .collect();

    match pricing {
        PricingModel::Weight => format!("{localized} {}", locale.weight_unit()),
        PricingModel::Unit => localized,
    }
}

fn trim_decimal(formatted: &str) -> String {
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_owned()
    } else {
        formatted.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_quantity() {
        assert!((clamp_quantity(f64::NAN, 1.0) - 1.0).abs() < f64::EPSILON);
        assert!((clamp_quantity(f64::INFINITY, 2.0) - 2.0).abs() < f64::EPSILON);
        assert!(clamp_quantity(-3.0, 1.0).abs() < f64::EPSILON);
        assert!((clamp_quantity(150.0, 1.0) - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_round_removes_float_noise() {
        let sum = 0.1 + 0.2;
        assert!((round_qty(sum) - 0.3).abs() < f64::EPSILON);
        assert!((round_qty(1.23456) - 1.235).abs() < f64::EPSILON);
    }

    #[test]
    fn test_round_is_idempotent() {
        for x in [0.0, 0.1 + 0.2, 1.0005, 2.4999, -7.123_456, 98.9999, 1e9 + 0.123] {
            let once = round_qty(x);
            assert!(
                (round_qty(once) - once).abs() < f64::EPSILON * once.abs().max(1.0),
                "rounding {x} twice changed the value"
            );
        }
    }

    #[test]
    fn test_is_fractional() {
        assert!(is_fractional(0.5));
        assert!(is_fractional(1.25));
        assert!(!is_fractional(2.0));
        assert!(!is_fractional(2.000_000_1));
        assert!(!is_fractional(f64::NAN));
    }

    #[test]
    fn test_format_quantity_key() {
        assert_eq!(format_quantity_key(2.0, 1.0), "2");
        assert_eq!(format_quantity_key(2.000_000_1, 1.0), "2");
        assert_eq!(format_quantity_key(0.5, 1.0), "0.5");
        assert_eq!(format_quantity_key(f64::NAN, 1.0), "1");
        assert_eq!(format_quantity_key(-4.0, 1.0), "0");
    }

    #[test]
    fn test_normalize_line_quantity() {
        assert!((normalize_line_quantity(2.4, false) - 2.0).abs() < f64::EPSILON);
        assert!((normalize_line_quantity(0.2, false) - 1.0).abs() < f64::EPSILON);
        assert!((normalize_line_quantity(120.0, false) - 99.0).abs() < f64::EPSILON);
        assert!((normalize_line_quantity(0.2504, true) - 0.25).abs() < f64::EPSILON);
        assert!(normalize_line_quantity(-1.0, true).abs() < f64::EPSILON);
    }

    #[test]
    fn test_format_quantity_label() {
        assert_eq!(
            format_quantity_label(2.0, PricingModel::Unit, Locale::English),
            "2"
        );
        assert_eq!(
            format_quantity_label(1.5, PricingModel::Weight, Locale::English),
            "1.5 kg"
        );
        assert_eq!(
            format_quantity_label(1.25, PricingModel::Weight, Locale::Arabic),
            "١٫٢٥ كغ"
        );
    }
}
