//! Storefront languages.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when parsing an unsupported language code.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported language code: {0}")]
pub struct UnsupportedLocale(pub String);

/// Language the storefront renders in; sent to the API as the `lang` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Locale {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ar")]
    Arabic,
}

impl Locale {
    /// ISO 639-1 code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Arabic => "ar",
        }
    }

    /// Decimal separator used when rendering numbers.
    #[must_use]
    pub const fn decimal_separator(self) -> char {
        match self {
            Self::English => '.',
            Self::Arabic => '\u{066B}',
        }
    }

    /// Suffix for weight-priced quantities.
    #[must_use]
    pub const fn weight_unit(self) -> &'static str {
        match self {
            Self::English => "kg",
            Self::Arabic => "كغ",
        }
    }

    /// Map an ASCII digit to this locale's numeral.
    #[must_use]
    pub fn digit(self, ascii: char) -> char {
        match self {
            Self::English => ascii,
            Self::Arabic => ascii
                .to_digit(10)
                .and_then(|d| char::from_u32(0x0660 + d))
                .unwrap_or(ascii),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = UnsupportedLocale;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "en-us" | "en-gb" => Ok(Self::English),
            "ar" | "ar-ae" | "ar-sa" => Ok(Self::Arabic),
            other => Err(UnsupportedLocale(other.to_owned())),
        }
    }
}
