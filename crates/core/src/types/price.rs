//! Money in integer minor units.
//!
//! The cart API quotes every amount in cents. Arithmetic stays in `i64` so
//! repeated additions never drift; conversion to [`Decimal`] only happens for
//! display.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Sub, SubAssign};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An amount of money in the currency's minor unit (cents).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    /// Zero cents.
    pub const ZERO: Self = Self(0);

    /// Create an amount from a count of cents.
    #[must_use]
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Get the raw number of cents.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Multiply a unit price by a (possibly fractional) quantity.
    ///
    /// The product is rounded half away from zero to whole cents.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn times(self, quantity: f64) -> Self {
        if !quantity.is_finite() {
            return Self::ZERO;
        }
        Self((self.0 as f64 * quantity).round() as i64)
    }

    /// Amount in the currency's standard unit (e.g. dollars, not cents).
    #[must_use]
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Format for display with the given currency (e.g. `$3.50`).
    #[must_use]
    pub fn display(self, currency: CurrencyCode) -> String {
        let amount = self.to_decimal().round_dp(2);
        if amount.is_sign_negative() && !amount.is_zero() {
            format!("-{}{:.2}", currency.symbol(), amount.abs())
        } else {
            format!("{}{amount:.2}", currency.symbol())
        }
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl From<i64> for Cents {
    fn from(cents: i64) -> Self {
        Self(cents)
    }
}

impl Add for Cents {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Cents {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Cents {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Cents {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Sum for Cents {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

/// ISO 4217 currency codes the storefront sells in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    AED,
    SAR,
}

impl CurrencyCode {
    /// Display symbol for the currency.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::USD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
            Self::AED => "AED ",
            Self::SAR => "SAR ",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_times_rounds_to_whole_cents() {
        assert_eq!(Cents::new(350).times(2.0), Cents::new(700));
        assert_eq!(Cents::new(999).times(0.25), Cents::new(250));
        assert_eq!(Cents::new(100).times(f64::NAN), Cents::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(Cents::new(350).display(CurrencyCode::USD), "$3.50");
        assert_eq!(Cents::new(5).display(CurrencyCode::EUR), "€0.05");
        assert_eq!(Cents::new(-120).display(CurrencyCode::USD), "-$1.20");
    }

    #[test]
    fn test_sum_and_arithmetic() {
        let total: Cents = [Cents::new(100), Cents::new(250)].into_iter().sum();
        assert_eq!(total, Cents::new(350));
        assert_eq!(total - Cents::new(50), Cents::new(300));
    }
}
