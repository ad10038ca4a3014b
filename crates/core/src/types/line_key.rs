//! Composite identity of a cart line.
//!
//! A line is identified by `(product, branch, options)`. Two items with the
//! same key are the same logical line and must be merged, never duplicated.
//! Both the guest cart and the merge step derive keys through this module so
//! the two schemes can never diverge.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::{BranchId, OptionId, OptionSelection, ProductId};
use crate::quantity::format_quantity_key;

/// Options key used when a line carries no option selections.
pub const NO_OPTIONS: &str = "no-options";

/// Placeholder for a missing branch inside a key.
const NO_BRANCH: &str = "-";

/// Composite cart line key: `product|branch|options`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineKey(String);

impl LineKey {
    /// Build the key for a product, branch and option selections.
    #[must_use]
    pub fn new(
        product_id: &ProductId,
        branch_id: Option<&BranchId>,
        options: &[OptionSelection],
    ) -> Self {
        Self::from_parts(
            product_id,
            branch_id,
            options.iter().map(|o| (&o.option_id, o.quantity)),
        )
    }

    /// Build the key from raw `(option id, quantity)` pairs.
    ///
    /// Used for server lines, whose option payload differs from
    /// [`OptionSelection`].
    #[must_use]
    pub fn from_parts<'a>(
        product_id: &ProductId,
        branch_id: Option<&BranchId>,
        options: impl IntoIterator<Item = (&'a OptionId, f64)>,
    ) -> Self {
        let branch = branch_id
            .filter(|b| !b.is_blank())
            .map_or(NO_BRANCH, BranchId::as_str);
        Self(format!(
            "{product_id}|{branch}|{}",
            options_key(options)
        ))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic, order-independent signature of option selections.
///
/// Entries with a blank ID or non-positive quantity do not contribute.
#[must_use]
pub fn options_key<'a>(options: impl IntoIterator<Item = (&'a OptionId, f64)>) -> String {
    let mut parts: Vec<String> = options
        .into_iter()
        .filter(|(id, qty)| !id.is_blank() && qty.is_finite() && *qty > 0.0)
        .map(|(id, qty)| format!("{id}:{}", format_quantity_key(qty, 1.0)))
        .collect();

    if parts.is_empty() {
        return NO_OPTIONS.to_owned();
    }

    parts.sort_unstable();
    parts.join(",")
}
