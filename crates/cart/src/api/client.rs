//! Cart API client implementation.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, instrument};
use url::Url;

use harvest_core::CartItemId;

use super::auth::{AuthTokens, TokenManager};
use super::normalize::normalize_cart;
use super::types::{
    AddItemInput, ApplyCouponInput, RequestContext, ServerCart, UpdateItemInput,
};
use super::ApiError;
use crate::config::ApiConfig;

/// Longest error body excerpt kept in errors and logs.
const ERROR_BODY_LIMIT: usize = 200;

// =============================================================================
// CartClient
// =============================================================================

/// Client for the server cart API.
///
/// Cheap to clone; clones share the HTTP connection pool and token state.
#[derive(Clone)]
pub struct CartClient {
    inner: Arc<CartClientInner>,
}

struct CartClientInner {
    client: reqwest::Client,
    base_url: Url,
    tokens: TokenManager,
}

impl CartClient {
    /// Create a new cart API client.
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid or the HTTP client fails to
    /// build.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ApiError::InvalidBaseUrl(format!("{}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(config.base_url.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            inner: Arc::new(CartClientInner {
                client,
                base_url,
                tokens: TokenManager::default(),
            }),
        })
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Set the bearer tokens used for every request.
    pub async fn set_tokens(&self, tokens: AuthTokens) {
        self.inner.tokens.set(Some(tokens)).await;
    }

    /// Drop the bearer tokens.
    pub async fn clear_tokens(&self) {
        self.inner.tokens.set(None).await;
    }

    /// Whether bearer tokens are set.
    pub async fn has_tokens(&self) -> bool {
        self.inner.tokens.is_set().await
    }

    // =========================================================================
    // Cart Operations
    // =========================================================================

    /// Fetch the current cart.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is not a cart.
    #[instrument(skip(self, ctx), fields(lang = %ctx.locale))]
    pub async fn get_cart(&self, ctx: &RequestContext) -> Result<ServerCart, ApiError> {
        self.execute(Method::GET, &["cart"], ctx, None::<&()>).await
    }

    /// Add a product to the cart.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the server rejects the item.
    #[instrument(skip(self, ctx, input), fields(product_id = %input.product_id, qty = input.qty))]
    pub async fn add_item(
        &self,
        ctx: &RequestContext,
        input: &AddItemInput,
    ) -> Result<ServerCart, ApiError> {
        self.execute(Method::POST, &["cart", "items"], ctx, Some(input))
            .await
    }

    /// Set the quantity of a cart line.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the line does not exist.
    #[instrument(skip(self, ctx), fields(item_id = %item_id))]
    pub async fn update_item(
        &self,
        ctx: &RequestContext,
        item_id: &CartItemId,
        qty: f64,
    ) -> Result<ServerCart, ApiError> {
        self.execute(
            Method::PATCH,
            &["cart", "items", item_id.as_str()],
            ctx,
            Some(&UpdateItemInput { qty }),
        )
        .await
    }

    /// Remove a cart line.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails.
    #[instrument(skip(self, ctx), fields(item_id = %item_id))]
    pub async fn remove_item(
        &self,
        ctx: &RequestContext,
        item_id: &CartItemId,
    ) -> Result<ServerCart, ApiError> {
        self.execute(
            Method::DELETE,
            &["cart", "items", item_id.as_str()],
            ctx,
            None::<&()>,
        )
        .await
    }

    /// Apply a coupon code.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the coupon is rejected.
    #[instrument(skip(self, ctx))]
    pub async fn apply_coupon(
        &self,
        ctx: &RequestContext,
        coupon_code: &str,
    ) -> Result<ServerCart, ApiError> {
        let body = ApplyCouponInput {
            coupon_code: coupon_code.to_string(),
        };
        self.execute(Method::POST, &["cart", "apply-coupon"], ctx, Some(&body))
            .await
    }

    /// Remove the applied coupon.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails.
    #[instrument(skip(self, ctx))]
    pub async fn remove_coupon(&self, ctx: &RequestContext) -> Result<ServerCart, ApiError> {
        self.execute(Method::DELETE, &["cart", "coupon"], ctx, None::<&()>)
            .await
    }

    /// Remove every line from the cart.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails.
    #[instrument(skip(self, ctx))]
    pub async fn clear_cart(&self, ctx: &RequestContext) -> Result<ServerCart, ApiError> {
        self.execute(Method::POST, &["cart", "clear"], ctx, None::<&()>)
            .await
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Build `{base}/{segments}?lang=..&addressId=..`.
    fn endpoint(&self, segments: &[&str], ctx: &RequestContext) -> Result<Url, ApiError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidBaseUrl(self.inner.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("lang", ctx.locale.code());
            if let Some(address_id) = ctx.address_id.as_ref().filter(|a| !a.is_blank()) {
                query.append_pair("addressId", address_id.as_str());
            }
        }

        Ok(url)
    }

    /// Send a request, refreshing the token and replaying once on 401.
    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        ctx: &RequestContext,
        body: Option<&B>,
    ) -> Result<ServerCart, ApiError> {
        let url = self.endpoint(segments, ctx)?;
        let tokens = &self.inner.tokens;

        if tokens.needs_refresh().await {
            let (_, generation) = tokens.current().await;
            tokens
                .refresh_after(&self.inner.client, &self.inner.base_url, generation)
                .await?;
        }

        let (token, generation) = tokens.current().await;
        let response = self
            .send_once(method.clone(), url.clone(), body, token.as_ref())
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED || token.is_none() {
            return read_cart(response).await;
        }

        debug!("Access token rejected, refreshing");
        tokens
            .refresh_after(&self.inner.client, &self.inner.base_url, generation)
            .await?;

        let (token, _) = tokens.current().await;
        let response = self.send_once(method, url, body, token.as_ref()).await?;
        read_cart(response).await
    }

    async fn send_once<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        token: Option<&SecretString>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self
            .inner
            .client
            .request(method, url)
            .header("Accept", "application/json");

        if let Some(token) = token {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }
}

async fn read_cart(response: reqwest::Response) -> Result<ServerCart, ApiError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1);
        return Err(ApiError::RateLimited(retry_after));
    }

    let text = response.text().await?;

    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized(error_message(&text)));
    }

    if !status.is_success() {
        error!(
            status = %status,
            body = %text.chars().take(ERROR_BODY_LIMIT).collect::<String>(),
            "Cart API returned non-success status"
        );
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(&text),
        });
    }

    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).map_err(|source| ApiError::Parse {
            context: "response body",
            source,
        })?
    };

    normalize_cart(body)
}

/// Pull a human-readable message out of an error body.
///
/// Prefers `message`, then `error`, then `data.message`; falls back to the
/// truncated raw body.
fn error_message(text: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(text).ok();
    let field = parsed.as_ref().and_then(|v| {
        ["/message", "/error", "/data/message"]
            .iter()
            .find_map(|pointer| v.pointer(pointer).and_then(Value::as_str))
    });

    field.map_or_else(
        || text.chars().take(ERROR_BODY_LIMIT).collect(),
        ToString::to_string,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use harvest_core::Locale;

    use super::*;

    fn client(base_url: &str) -> CartClient {
        CartClient::new(&ApiConfig {
            base_url: base_url.to_string(),
            ..ApiConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_with_address() {
        let client = client("https://api.example.test/v1");
        let ctx = RequestContext::new(Locale::Arabic).with_address("addr-9");
        let url = client.endpoint(&["cart", "items", "abc"], &ctx).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.test/v1/cart/items/abc?lang=ar&addressId=addr-9"
        );
    }

    #[test]
    fn test_endpoint_omits_missing_address() {
        let client = client("https://api.example.test/v1/");
        let url = client
            .endpoint(&["cart"], &RequestContext::default())
            .unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/v1/cart?lang=en");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = CartClient::new(&ApiConfig {
            base_url: "not a url".to_string(),
            ..ApiConfig::default()
        });
        assert!(matches!(result, Err(ApiError::InvalidBaseUrl(_))));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"message":"Coupon expired"}"#), "Coupon expired");
        assert_eq!(error_message(r#"{"error":"Bad item"}"#), "Bad item");
        assert_eq!(
            error_message(r#"{"data":{"message":"Out of stock"}}"#),
            "Out of stock"
        );
        assert_eq!(error_message("gateway down"), "gateway down");
    }
}
