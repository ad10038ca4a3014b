//! Guest cart store.
//!
//! Holds cart lines for users who have not signed in. Lines are keyed by
//! [`LineKey`], so adding the same product with the same branch and options
//! grows one line instead of creating a duplicate. Every mutation is written
//! through to a [`CartStorage`] backend as a versioned snapshot; loading runs
//! the snapshot through [`migrate`] first.

pub mod migrate;
mod storage;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use harvest_core::quantity::{
    clamp_quantity, is_fractional, normalize_line_quantity, round_qty,
};
use harvest_core::{
    BranchId, Cents, LineKey, OptionSelection, PricingModel, ProductId, ProductSnapshot,
    ProviderId,
};

pub use migrate::{CURRENT_VERSION, migrate};
pub use storage::{CartStorage, FileStorage, MemoryStorage, StorageError};

/// Storage key the guest cart snapshot lives under.
pub const STORAGE_KEY: &str = "guest-cart";

// =============================================================================
// Types
// =============================================================================

/// A line in the guest cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCartItem {
    /// Composite line key; doubles as the line ID.
    pub id: LineKey,
    /// Product on this line.
    pub product_id: ProductId,
    /// Branch the product is sold from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<BranchId>,
    /// Provider of the product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
    /// Display name.
    pub name: String,
    /// Image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Unit price including add-ons, captured when first added.
    pub unit_price_cents: Cents,
    /// Pricing model.
    #[serde(default)]
    pub pricing_model: PricingModel,
    /// Quantity; always positive.
    pub quantity: f64,
    /// Selected options.
    #[serde(default)]
    pub options: Vec<OptionSelection>,
    /// Category name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Units in stock when added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<f64>,
}

impl LocalCartItem {
    /// Whether this line holds fractional quantities.
    #[must_use]
    pub fn allows_fractional(&self) -> bool {
        self.pricing_model.is_weight() || self.options.iter().any(OptionSelection::is_fractional)
    }

    /// `unit price × quantity`, rounded to whole cents.
    #[must_use]
    pub fn line_total(&self) -> Cents {
        self.unit_price_cents.times(self.quantity)
    }
}

/// Persisted guest cart state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalCartState {
    /// Lines in insertion order.
    #[serde(default)]
    pub items: Vec<LocalCartItem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    state: &'a LocalCartState,
}

// =============================================================================
// LocalCartStore
// =============================================================================

/// Write-through guest cart.
pub struct LocalCartStore {
    state: LocalCartState,
    storage: Arc<dyn CartStorage>,
    key: String,
}

impl std::fmt::Debug for LocalCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCartStore")
            .field("key", &self.key)
            .field("lines", &self.state.items.len())
            .finish_non_exhaustive()
    }
}

impl LocalCartStore {
    /// Load the guest cart from `storage`.
    ///
    /// A snapshot that cannot be parsed or migrated is discarded with a
    /// warning; the cart starts empty rather than blocking the user.
    ///
    /// # Errors
    ///
    /// Returns error if the backend itself cannot be read.
    pub fn open(storage: Arc<dyn CartStorage>) -> Result<Self, StorageError> {
        let state = match storage.load(STORAGE_KEY)? {
            Some(raw) => decode_snapshot(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding unreadable guest cart snapshot");
                LocalCartState::default()
            }),
            None => LocalCartState::default(),
        };

        debug!(lines = state.items.len(), "Guest cart loaded");

        Ok(Self {
            state,
            storage,
            key: STORAGE_KEY.to_string(),
        })
    }

    /// An empty cart backed by [`MemoryStorage`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: LocalCartState::default(),
            storage: Arc::new(MemoryStorage::new()),
            key: STORAGE_KEY.to_string(),
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `qty` of a product with the given options.
    ///
    /// Options are normalized first. An existing line with the same key grows;
    /// otherwise a new line is created. Returns the line key, or `None` when
    /// the quantity rounds to nothing and no line exists.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be persisted.
    #[instrument(skip(self, product, options), fields(product_id = %product.id))]
    pub fn add(
        &mut self,
        product: &ProductSnapshot,
        qty: f64,
        options: &[OptionSelection],
    ) -> Result<Option<LineKey>, StorageError> {
        let qty = clamp_quantity(qty, 1.0);
        if qty <= 0.0 {
            return Ok(None);
        }

        let options = OptionSelection::normalize_all(options);
        let fractional = product.is_fractional_with(&options);
        let key = LineKey::new(&product.id, product.branch_id.as_ref(), &options);

        if let Some(existing) = self.state.items.iter_mut().find(|i| i.id == key) {
            existing.quantity = normalize_line_quantity(existing.quantity + qty, fractional);
        } else {
            let quantity = normalize_line_quantity(qty, fractional);
            if quantity <= 0.0 {
                return Ok(None);
            }
            self.state.items.push(LocalCartItem {
                id: key.clone(),
                product_id: product.id.clone(),
                branch_id: product.branch_id.clone(),
                provider_id: product.provider_id.clone(),
                name: product.name.clone(),
                image: product.image.clone(),
                unit_price_cents: product.unit_price_with(&options),
                pricing_model: product.pricing_model,
                quantity,
                options,
                category: product.category.clone(),
                stock: product.stock,
            });
        }

        self.persist()?;
        Ok(Some(key))
    }

    /// Delete a line. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be persisted.
    pub fn remove(&mut self, item_id: &str) -> Result<bool, StorageError> {
        let before = self.state.items.len();
        self.state.items.retain(|i| i.id.as_str() != item_id);
        if self.state.items.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Set a line's quantity. Returns whether the line existed.
    ///
    /// A quantity of zero or less removes the line. A non-finite quantity
    /// leaves it unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be persisted.
    pub fn set_qty(&mut self, item_id: &str, qty: f64) -> Result<bool, StorageError> {
        let Some(item) = self
            .state
            .items
            .iter_mut()
            .find(|i| i.id.as_str() == item_id)
        else {
            return Ok(false);
        };

        let qty = clamp_quantity(qty, item.quantity);
        let fractional = item.allows_fractional() || is_fractional(qty);
        let qty = if qty > 0.0 {
            normalize_line_quantity(qty, fractional)
        } else {
            0.0
        };
        // Fractions below the rounding step land on zero
        if qty <= 0.0 {
            return self.remove(item_id);
        }

        item.quantity = qty;
        self.persist()?;
        Ok(true)
    }

    /// Remove every line.
    ///
    /// # Errors
    ///
    /// Returns error if the persisted snapshot cannot be removed.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.state.items.clear();
        self.storage.remove(&self.key)
    }

    fn persist(&self) -> Result<(), StorageError> {
        let snapshot = SnapshotRef {
            version: CURRENT_VERSION,
            saved_at: Utc::now(),
            state: &self.state,
        };
        let json = serde_json::to_string(&snapshot)?;
        self.storage.save(&self.key, &json)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Lines in insertion order.
    #[must_use]
    pub fn items(&self) -> &[LocalCartItem] {
        &self.state.items
    }

    /// Find a line by key.
    #[must_use]
    pub fn get(&self, item_id: &str) -> Option<&LocalCartItem> {
        self.state.items.iter().find(|i| i.id.as_str() == item_id)
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.items.is_empty()
    }

    /// Number of lines.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.state.items.len()
    }

    /// Sum of line totals.
    #[must_use]
    pub fn subtotal(&self) -> Cents {
        self.state.items.iter().map(LocalCartItem::line_total).sum()
    }

    /// Total quantity across lines, rounded.
    #[must_use]
    pub fn total_quantity(&self) -> f64 {
        round_qty(self.state.items.iter().map(|i| i.quantity).sum())
    }
}

/// Parse a stored snapshot, treating a blob without `version` as version 0.
fn decode_snapshot(raw: &str) -> Result<LocalCartState, StorageError> {
    let mut value: Value = serde_json::from_str(raw)?;

    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0);

    let state = value.get_mut("state").map(Value::take);
    migrate(state.unwrap_or(value), version)
}

// =============================================================================
// SharedLocalCart
// =============================================================================

/// Thread-safe handle to the guest cart.
///
/// The lock is synchronous and must never be held across an `.await`; use
/// the closure helpers, which release it before returning.
#[derive(Debug, Clone)]
pub struct SharedLocalCart {
    inner: Arc<Mutex<LocalCartStore>>,
}

impl SharedLocalCart {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: LocalCartStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Run a mutation against the store.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or `StorageError::LockPoisoned`.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut LocalCartStore) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut store = self
            .inner
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        f(&mut store)
    }

    /// Read from the store.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::LockPoisoned` if a writer panicked.
    pub fn read<T>(&self, f: impl FnOnce(&LocalCartStore) -> T) -> Result<T, StorageError> {
        let store = self
            .inner
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(f(&store))
    }

    /// Copy of every line.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::LockPoisoned` if a writer panicked.
    pub fn snapshot(&self) -> Result<Vec<LocalCartItem>, StorageError> {
        self.read(|s| s.items().to_vec())
    }
}
