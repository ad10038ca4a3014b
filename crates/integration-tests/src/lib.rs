//! End-to-end tests for the Harvest cart session.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p harvest-integration-tests
//! ```
//!
//! Every test gets its own `wiremock` server standing in for the cart API,
//! so no external services are needed.
//!
//! # Test Categories
//!
//! - `guest_to_member` - Guest cart persistence and the sign-in merge
//! - `session` - Server-mode mutations: optimistic updates, rollback,
//!   offline guard

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use serde_json::{Value, json};
use wiremock::MockServer;

use harvest_cart::config::ApiConfig;
use harvest_cart::local::{CartStorage, FileStorage, LocalCartStore, MemoryStorage, SharedLocalCart};
use harvest_cart::retry::RetryPolicy;
use harvest_cart::{AuthTokens, CartClient, CartSession, Connectivity, SessionOptions};

/// A mock cart API and a session pointed at it.
pub struct TestContext {
    pub server: MockServer,
    pub session: CartSession,
}

impl TestContext {
    /// Session with an in-memory guest cart.
    pub async fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStorage::new())).await
    }

    /// Session whose guest cart lives in `storage`.
    pub async fn with_storage(storage: Arc<dyn CartStorage>) -> Self {
        let server = MockServer::start().await;
        let session = session_for(&server, storage);
        Self { server, session }
    }
}

/// Build a session against `server` without retries.
///
/// # Panics
///
/// Panics if the client or guest cart cannot be created.
#[must_use]
pub fn session_for(server: &MockServer, storage: Arc<dyn CartStorage>) -> CartSession {
    let client = CartClient::new(&ApiConfig {
        base_url: server.uri(),
        timeout_secs: 5,
        user_agent: "harvest-integration/0.1".to_string(),
    })
    .expect("failed to build test CartClient");

    let local = SharedLocalCart::new(LocalCartStore::open(storage).expect("failed to open guest cart"));

    CartSession::new(
        client,
        local,
        Connectivity::online(),
        SessionOptions {
            query_retry: RetryPolicy::none(),
            ..SessionOptions::default()
        },
    )
}

/// Fresh directory for a file-backed guest cart.
#[must_use]
pub fn temp_storage_dir() -> PathBuf {
    std::env::temp_dir().join(format!("harvest-it-{}", uuid::Uuid::new_v4()))
}

/// File-backed guest cart storage in `dir`.
#[must_use]
pub fn file_storage(dir: &Path) -> Arc<dyn CartStorage> {
    Arc::new(FileStorage::new(dir))
}

/// Tokens for a signed-in test user.
#[must_use]
pub fn member_tokens() -> AuthTokens {
    AuthTokens::new(
        SecretString::from("member-access-token".to_string()),
        Some(SecretString::from("member-refresh-token".to_string())),
    )
}

/// A server cart line.
#[must_use]
pub fn line(id: &str, product_id: &str, qty: f64, unit_price_cents: i64) -> Value {
    json!({
        "id": id,
        "productId": product_id,
        "name": product_id.to_uppercase(),
        "qty": qty,
        "unitPriceCents": unit_price_cents
    })
}

/// A server cart wrapped in the usual `data` envelope.
#[must_use]
pub fn cart_json(lines: Vec<Value>) -> Value {
    json!({ "data": { "cartId": "cart-1", "items": lines, "currency": "USD" } })
}
