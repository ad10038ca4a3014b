//! Cart session: the single cart consumers talk to.
//!
//! # Modes
//!
//! - **Guest**: no user is signed in. Every operation maps onto the
//!   [`LocalCartStore`]; coupons need an account and are rejected.
//! - **Server**: a user is signed in. The server cart is read through a
//!   `moka` cache keyed by [`RequestContext`]. Mutations patch the cached cart
//!   optimistically, call the API, restore the previous cart if the call
//!   fails, and finally refetch so the cache matches the server.
//!
//! Signing in merges the guest cart into the server cart once per user. While
//! offline, server-mode mutations fail fast and leave the cache untouched;
//! guest mutations keep working.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = CartSession::from_config(&config)?;
//!
//! session.add_product(&milk, 2.0, &[]).await?;           // guest cart
//! let outcome = session.sign_in(user_id, Some(tokens)).await?; // merges once
//! let view = session.cart().await?;                     // server cart
//! ```

mod optimistic;
mod view;

use std::collections::{HashMap, HashSet};
use std::future::{Future, ready};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use moka::future::Cache;
use moka::ops::compute::Op;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use harvest_core::quantity::{clamp_quantity, is_fractional, normalize_line_quantity};
use harvest_core::{
    AddressId, CartItemId, CurrencyCode, LineKey, Locale, OptionSelection, ProductSnapshot, UserId,
};

pub use view::{CartLineView, CartMode, CartView, LoyaltyView};

use crate::api::{AddItemInput, ApiError, AuthTokens, CartClient, RequestContext, ServerCart};
use crate::config::HarvestConfig;
use crate::error::{CartError, Result};
use crate::local::{FileStorage, LocalCartStore, SharedLocalCart};
use crate::merge::{MergeError, MergeOutcome, merge_guest_cart};
use crate::network::Connectivity;
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Busy key used for whole-cart mutations.
const CART_BUSY_KEY: &str = "cart";

/// Busy key used for coupon mutations.
const COUPON_BUSY_KEY: &str = "coupon";

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Initial language and delivery address.
    pub context: RequestContext,
    /// Retry policy for cart fetches.
    pub query_retry: RetryPolicy,
    /// Retry policy for cart mutations.
    pub mutation_retry: RetryPolicy,
    /// How long a fetched server cart stays cached.
    pub cache_ttl: Duration,
    /// Currency used for the guest cart.
    pub currency: CurrencyCode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            context: RequestContext::default(),
            query_retry: RetryPolicy::new(2, Duration::from_millis(500)),
            mutation_retry: RetryPolicy::none(),
            cache_ttl: Duration::from_secs(300),
            currency: CurrencyCode::default(),
        }
    }
}

// =============================================================================
// CartSession
// =============================================================================

/// Dual-mode cart shared by every consumer.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct CartSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    client: CartClient,
    local: SharedLocalCart,
    network: Connectivity,
    cache: Cache<RequestContext, ServerCart>,
    user: RwLock<Option<UserId>>,
    context: RwLock<RequestContext>,
    merge: MergeState,
    /// In-flight mutation count per line ID (or busy key).
    mutating: std::sync::Mutex<HashMap<String, usize>>,
    options: SessionOptions,
}

#[derive(Default)]
struct MergeState {
    merged_for: Mutex<Option<UserId>>,
    in_flight: AtomicBool,
    last_error: Mutex<Option<MergeError>>,
}

impl CartSession {
    /// Create a session from its parts.
    #[must_use]
    pub fn new(
        client: CartClient,
        local: SharedLocalCart,
        network: Connectivity,
        options: SessionOptions,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(options.cache_ttl)
            .build();

        Self {
            inner: Arc::new(SessionInner {
                client,
                local,
                network,
                cache,
                user: RwLock::new(None),
                context: RwLock::new(options.context.clone()),
                merge: MergeState::default(),
                mutating: std::sync::Mutex::new(HashMap::new()),
                options,
            }),
        }
    }

    /// Build a session from configuration, with the guest cart stored on disk.
    ///
    /// Credentials in the configuration are not applied here; pass them to
    /// [`Self::sign_in`].
    ///
    /// # Errors
    ///
    /// Returns error if the client cannot be built or the guest cart cannot
    /// be read.
    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        let client = CartClient::new(&config.api)?;
        let storage = FileStorage::new(&config.storage_dir);
        let local = SharedLocalCart::new(LocalCartStore::open(Arc::new(storage))?);

        let options = SessionOptions {
            context: RequestContext {
                locale: config.locale,
                address_id: config.address_id.clone(),
            },
            query_retry: config.query_retry,
            mutation_retry: config.mutation_retry,
            cache_ttl: config.cache_ttl,
            currency: config.currency,
        };

        Ok(Self::new(client, local, Connectivity::online(), options))
    }

    /// The API client.
    #[must_use]
    pub fn client(&self) -> &CartClient {
        &self.inner.client
    }

    /// The guest cart.
    #[must_use]
    pub fn local(&self) -> &SharedLocalCart {
        &self.inner.local
    }

    /// The connectivity flag consulted by the offline guard.
    #[must_use]
    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.network
    }

    // =========================================================================
    // Identity & Context
    // =========================================================================

    /// Current cart mode.
    pub async fn mode(&self) -> CartMode {
        if self.inner.user.read().await.is_some() {
            CartMode::Server
        } else {
            CartMode::Guest
        }
    }

    /// Signed-in user, if any.
    pub async fn user(&self) -> Option<UserId> {
        self.inner.user.read().await.clone()
    }

    /// Current language and delivery address.
    pub async fn context(&self) -> RequestContext {
        self.inner.context.read().await.clone()
    }

    /// Switch the delivery address; the next read uses a different cache entry.
    pub async fn set_address(&self, address_id: Option<AddressId>) {
        self.inner.context.write().await.address_id = address_id;
    }

    /// Switch the language.
    pub async fn set_locale(&self, locale: Locale) {
        self.inner.context.write().await.locale = locale;
    }

    /// Sign a user in and merge the guest cart into their server cart.
    ///
    /// The merge runs at most once per user until [`Self::sign_out`]. Returns
    /// the merge outcome when a merge ran.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for a blank user ID and
    /// `CartError::Storage` if the guest cart lock is poisoned. API failures
    /// during the merge are reported in the outcome, not as errors.
    #[instrument(skip(self, tokens))]
    pub async fn sign_in(
        &self,
        user_id: UserId,
        tokens: Option<AuthTokens>,
    ) -> Result<Option<MergeOutcome>> {
        if user_id.is_blank() {
            return Err(CartError::Validation("user id is required".to_string()));
        }

        if let Some(tokens) = tokens {
            self.inner.client.set_tokens(tokens).await;
        }

        let previous = self.inner.user.write().await.replace(user_id.clone());
        if previous.as_ref() != Some(&user_id) {
            self.inner.cache.invalidate_all();
        }

        self.merge_once(&user_id).await
    }

    /// Sign out: drop tokens, the merge marker, the guest cart and the cache.
    ///
    /// # Errors
    ///
    /// Returns error if the guest cart cannot be cleared.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        self.inner.client.clear_tokens().await;
        *self.inner.user.write().await = None;
        *self.inner.merge.merged_for.lock().await = None;
        *self.inner.merge.last_error.lock().await = None;
        self.inner.local.update(LocalCartStore::clear)?;
        self.inner.cache.invalidate_all();
        info!("Signed out");
        Ok(())
    }

    /// Failures from the last merge, if it was partial.
    pub async fn merge_error(&self) -> Option<MergeError> {
        self.inner.merge.last_error.lock().await.clone()
    }

    /// Whether a merge is running.
    #[must_use]
    pub fn is_merging(&self) -> bool {
        self.inner.merge.in_flight.load(Ordering::Acquire)
    }

    async fn merge_once(&self, user_id: &UserId) -> Result<Option<MergeOutcome>> {
        if self.inner.merge.merged_for.lock().await.as_ref() == Some(user_id) {
            debug!("Guest cart already merged for this user");
            return Ok(None);
        }

        if self.inner.local.read(LocalCartStore::is_empty)? {
            *self.inner.merge.merged_for.lock().await = Some(user_id.clone());
            return Ok(None);
        }

        if self
            .inner
            .merge
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Merge already in flight");
            return Ok(None);
        }
        let _flight = InFlight(&self.inner.merge.in_flight);

        let ctx = self.context().await;
        let outcome = merge_guest_cart(&self.inner.client, &ctx, &self.inner.local).await?;

        *self.inner.merge.merged_for.lock().await = Some(user_id.clone());
        *self.inner.merge.last_error.lock().await = outcome.error.clone();

        self.inner.cache.invalidate(&ctx).await;
        if let Some(cart) = &outcome.cart {
            self.inner.cache.insert(ctx, cart.clone()).await;
        }

        if let Some(e) = &outcome.error {
            warn!(error = %e, "Guest cart merge was partial");
        }

        Ok(Some(outcome))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The cart for display.
    ///
    /// # Errors
    ///
    /// In server mode, returns error if the cart is not cached and cannot be
    /// fetched (`CartError::Offline` when offline).
    pub async fn cart(&self) -> Result<CartView> {
        match self.mode().await {
            CartMode::Guest => self.local_view().await,
            CartMode::Server => {
                let ctx = self.context().await;
                let cart = self.server_cart(&ctx).await?;
                Ok(self.server_view(&cart, &ctx))
            }
        }
    }

    /// Drop the cached server cart and fetch it again.
    ///
    /// # Errors
    ///
    /// Returns error if the cart cannot be fetched.
    pub async fn refresh(&self) -> Result<CartView> {
        if self.mode().await == CartMode::Guest {
            return self.local_view().await;
        }
        let ctx = self.context().await;
        self.inner.cache.invalidate(&ctx).await;
        let cart = self.fetch(&ctx).await?;
        Ok(self.server_view(&cart, &ctx))
    }

    /// The cached server cart for the current context, without fetching.
    pub async fn cached_cart(&self) -> Option<ServerCart> {
        let ctx = self.context().await;
        self.inner.cache.get(&ctx).await
    }

    /// Whether a mutation touching this line is in flight.
    #[must_use]
    pub fn is_item_mutating(&self, item_id: &str) -> bool {
        self.inner
            .mutating
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(item_id)
    }

    async fn local_view(&self) -> Result<CartView> {
        let items = self.inner.local.snapshot()?;
        let locale = self.inner.context.read().await.locale;
        Ok(CartView::from_local(
            &items,
            self.inner.options.currency,
            locale,
        ))
    }

    fn server_view(&self, cart: &ServerCart, ctx: &RequestContext) -> CartView {
        let mutating: HashSet<String> = self
            .inner
            .mutating
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        CartView::from_server(cart, ctx.locale, &mutating)
    }

    async fn server_cart(&self, ctx: &RequestContext) -> Result<ServerCart> {
        if let Some(cart) = self.inner.cache.get(ctx).await {
            debug!("Server cart cache hit");
            return Ok(cart);
        }
        if !self.inner.network.is_online() {
            return Err(CartError::Offline);
        }
        Ok(self.fetch(ctx).await?)
    }

    async fn fetch(&self, ctx: &RequestContext) -> std::result::Result<ServerCart, ApiError> {
        let client = &self.inner.client;
        let cart = retry_with_backoff(self.inner.options.query_retry, || client.get_cart(ctx)).await?;
        self.inner.cache.insert(ctx.clone(), cart.clone()).await;
        Ok(cart)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add a product to the cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for a blank product ID or non-positive
    /// quantity, `CartError::Offline` in server mode while offline, or the
    /// API/storage error that made the add fail.
    #[instrument(skip(self, product, options), fields(product_id = %product.id))]
    pub async fn add_product(
        &self,
        product: &ProductSnapshot,
        qty: f64,
        options: &[OptionSelection],
    ) -> Result<CartView> {
        if product.id.is_blank() {
            return Err(CartError::Validation("product id is required".to_string()));
        }
        let qty = clamp_quantity(qty, 1.0);
        if qty <= 0.0 {
            return Err(CartError::Validation(
                "quantity must be greater than zero".to_string(),
            ));
        }

        if self.mode().await == CartMode::Guest {
            self.inner
                .local
                .update(|store| store.add(product, qty, options))?;
            return self.local_view().await;
        }

        let options = OptionSelection::normalize_all(options);
        let key = LineKey::new(&product.id, product.branch_id.as_ref(), &options);
        let input = AddItemInput::new(
            product.id.clone(),
            qty,
            product.branch_id.clone(),
            &options,
        );
        let ctx = self.context().await;
        let client = &self.inner.client;

        self.mutate(
            &ctx,
            key.as_str(),
            |cart| optimistic::add_line(cart, product, qty, &options),
            || client.add_item(&ctx, &input),
        )
        .await
    }

    /// Set a line's quantity; zero or less removes the line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for a blank line ID or non-numeric
    /// quantity, `CartError::ItemNotFound` for an unknown guest line,
    /// `CartError::Offline` in server mode while offline, or the API error.
    #[instrument(skip(self))]
    pub async fn update_quantity(&self, item_id: &str, qty: f64) -> Result<CartView> {
        validate_item_id(item_id)?;
        if !qty.is_finite() {
            return Err(CartError::Validation("quantity must be a number".to_string()));
        }
        if qty <= 0.0 {
            return self.remove_item(item_id).await;
        }

        if self.mode().await == CartMode::Guest {
            let found = self.inner.local.update(|store| store.set_qty(item_id, qty))?;
            if !found {
                return Err(CartError::ItemNotFound(item_id.to_string()));
            }
            return self.local_view().await;
        }

        let ctx = self.context().await;
        let fractional = self
            .inner
            .cache
            .get(&ctx)
            .await
            .and_then(|cart| cart.item(item_id).map(crate::api::ServerCartItem::allows_fractional))
            .unwrap_or(false)
            || is_fractional(qty);
        let qty = normalize_line_quantity(qty, fractional);
        if qty <= 0.0 {
            return self.remove_item(item_id).await;
        }
        let id = CartItemId::new(item_id);
        let client = &self.inner.client;

        self.mutate(
            &ctx,
            item_id,
            |cart| optimistic::set_quantity(cart, item_id, qty),
            || client.update_item(&ctx, &id, qty),
        )
        .await
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for a blank line ID,
    /// `CartError::Offline` in server mode while offline, or the API error.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, item_id: &str) -> Result<CartView> {
        validate_item_id(item_id)?;

        if self.mode().await == CartMode::Guest {
            self.inner.local.update(|store| store.remove(item_id))?;
            return self.local_view().await;
        }

        let ctx = self.context().await;
        let id = CartItemId::new(item_id);
        let client = &self.inner.client;

        self.mutate(
            &ctx,
            item_id,
            |cart| optimistic::remove_line(cart, item_id),
            || client.remove_item(&ctx, &id),
        )
        .await
    }

    /// Apply a coupon code. Requires a signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for an empty code,
    /// `CartError::AuthRequired` in guest mode, `CartError::Offline` while
    /// offline, or the API error (e.g. an unknown code).
    #[instrument(skip(self))]
    pub async fn apply_coupon(&self, code: &str) -> Result<CartView> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CartError::Validation("coupon code is required".to_string()));
        }
        self.require_server_mode().await?;

        let ctx = self.context().await;
        let client = &self.inner.client;

        self.mutate(
            &ctx,
            COUPON_BUSY_KEY,
            |cart| optimistic::apply_coupon(cart, code),
            || client.apply_coupon(&ctx, code),
        )
        .await
    }

    /// Remove the applied coupon. Requires a signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `CartError::AuthRequired` in guest mode, `CartError::Offline`
    /// while offline, or the API error.
    #[instrument(skip(self))]
    pub async fn remove_coupon(&self) -> Result<CartView> {
        self.require_server_mode().await?;

        let ctx = self.context().await;
        let client = &self.inner.client;

        self.mutate(
            &ctx,
            COUPON_BUSY_KEY,
            optimistic::remove_coupon,
            || client.remove_coupon(&ctx),
        )
        .await
    }

    /// Remove every line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Offline` in server mode while offline, or the
    /// API/storage error.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<CartView> {
        if self.mode().await == CartMode::Guest {
            self.inner.local.update(LocalCartStore::clear)?;
            return self.local_view().await;
        }

        let ctx = self.context().await;
        let client = &self.inner.client;

        self.mutate(&ctx, CART_BUSY_KEY, optimistic::clear, || {
            client.clear_cart(&ctx)
        })
        .await
    }

    async fn require_server_mode(&self) -> Result<()> {
        if self.mode().await == CartMode::Guest {
            return Err(CartError::AuthRequired(
                "coupons are only available to signed-in customers".to_string(),
            ));
        }
        Ok(())
    }

    /// Optimistic mutation: guard, patch, call, roll back on failure, settle.
    async fn mutate<P, F, Fut>(
        &self,
        ctx: &RequestContext,
        busy_key: &str,
        patch: P,
        call: F,
    ) -> Result<CartView>
    where
        P: FnOnce(&mut ServerCart) + Send,
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<ServerCart, ApiError>>,
    {
        if !self.inner.network.is_online() {
            warn!("Rejecting cart mutation while offline");
            return Err(CartError::Offline);
        }

        let busy = self.mark_mutating(busy_key);
        let previous = self.apply_optimistic(ctx, patch).await;

        let result = retry_with_backoff(self.inner.options.mutation_retry, call).await;

        let outcome = match result {
            Ok(cart) => {
                self.inner.cache.insert(ctx.clone(), cart).await;
                Ok(())
            }
            Err(e) => {
                // Restores the whole pre-mutation cart, which can briefly hide a
                // concurrent mutation on another line until `settle` refetches.
                error!(error = %e, busy_key, "Cart mutation failed, rolling back");
                match previous {
                    Some(previous) => self.inner.cache.insert(ctx.clone(), previous).await,
                    None => self.inner.cache.invalidate(ctx).await,
                }
                Err(e)
            }
        };

        self.settle(ctx).await;
        drop(busy);
        outcome?;

        let cart = self.server_cart(ctx).await?;
        Ok(self.server_view(&cart, ctx))
    }

    /// Patch the cached cart in place; returns the cart as it was before.
    async fn apply_optimistic<P>(&self, ctx: &RequestContext, patch: P) -> Option<ServerCart>
    where
        P: FnOnce(&mut ServerCart) + Send,
    {
        let mut previous = None;
        self.inner
            .cache
            .entry(ctx.clone())
            .and_compute_with(|entry| {
                let op = match entry {
                    Some(entry) => {
                        let current = entry.into_value();
                        let mut patched = current.clone();
                        patch(&mut patched);
                        previous = Some(current);
                        Op::Put(patched)
                    }
                    None => Op::Nop,
                };
                ready(op)
            })
            .await;
        previous
    }

    /// Refetch after a mutation; keep the last known cart if that fails.
    async fn settle(&self, ctx: &RequestContext) {
        let last_known = self.inner.cache.get(ctx).await;
        self.inner.cache.invalidate(ctx).await;

        if let Err(e) = self.fetch(ctx).await {
            warn!(error = %e, "Could not refetch cart after mutation");
            if let Some(cart) = last_known {
                self.inner.cache.insert(ctx.clone(), cart).await;
            }
        }
    }

    fn mark_mutating(&self, key: &str) -> MutationGuard<'_> {
        *self
            .inner
            .mutating
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert(0) += 1;

        MutationGuard {
            mutating: &self.inner.mutating,
            key: key.to_string(),
        }
    }
}

fn validate_item_id(item_id: &str) -> Result<()> {
    if item_id.trim().is_empty() {
        return Err(CartError::Validation("cart item id is required".to_string()));
    }
    if item_id.starts_with(view::OPTIMISTIC_ID_PREFIX) {
        return Err(CartError::Validation(
            "this item is still being added".to_string(),
        ));
    }
    Ok(())
}

/// Decrements the busy count for a line when a mutation settles.
struct MutationGuard<'a> {
    mutating: &'a std::sync::Mutex<HashMap<String, usize>>,
    key: String,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        let mut map = self
            .mutating
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = map.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                map.remove(&self.key);
            }
        }
    }
}

/// Clears the merge in-flight flag however the merge ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
