//! Bearer token state and refresh.
//!
//! Tokens live in memory only. When a request hits 401 the client refreshes
//! through `POST /auth/refresh` and replays the request once. Only one refresh
//! runs at a time; requests that fail meanwhile wait on the gate and then
//! reuse whatever token the winner obtained.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};
use url::Url;

use super::ApiError;

/// Seconds before expiry at which a token is treated as expired.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Access and refresh tokens for the cart API.
#[derive(Clone)]
pub struct AuthTokens {
    /// Bearer token sent with every request.
    pub access_token: SecretString,
    /// Token exchanged for a new access token on 401.
    pub refresh_token: Option<SecretString>,
    /// Lifetime of the access token in seconds, if the server reported one.
    pub expires_in: Option<i64>,
    /// Unix timestamp when the access token was obtained.
    pub obtained_at: i64,
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

impl AuthTokens {
    /// Create tokens obtained now.
    #[must_use]
    pub fn new(access_token: SecretString, refresh_token: Option<SecretString>) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in: None,
            obtained_at: Utc::now().timestamp(),
        }
    }

    /// Set the access token lifetime.
    #[must_use]
    pub const fn with_expires_in(mut self, expires_in: i64) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Check if the access token is expired (with a 60 second buffer).
    ///
    /// Tokens without a known lifetime never expire proactively; the server
    /// tells us with a 401 instead.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_in.is_some_and(|expires_in| {
            let now = Utc::now().timestamp();
            let expires_at = self.obtained_at + expires_in;
            now >= (expires_at - EXPIRY_BUFFER_SECS)
        })
    }

    /// Whether a refresh token is available.
    #[must_use]
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenEnvelope {
    Wrapped { data: TokenResponse },
    Bare(TokenResponse),
}

impl TokenEnvelope {
    fn into_inner(self) -> TokenResponse {
        match self {
            Self::Wrapped { data } | Self::Bare(data) => data,
        }
    }
}

/// Token state shared by every clone of a client.
#[derive(Default)]
pub(super) struct TokenManager {
    tokens: RwLock<Option<AuthTokens>>,
    refresh_gate: Mutex<()>,
    /// Bumped whenever the tokens change, so waiters can tell whether
    /// somebody else already refreshed.
    generation: AtomicU64,
}

impl TokenManager {
    pub(super) async fn set(&self, tokens: Option<AuthTokens>) {
        let mut guard = self.tokens.write().await;
        *guard = tokens;
        // Bump under the write lock so `current` never pairs new tokens
        // with the old generation
        self.generation.fetch_add(1, Ordering::AcqRel);
        drop(guard);
    }

    pub(super) async fn is_set(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    /// Current access token and the generation it belongs to.
    pub(super) async fn current(&self) -> (Option<SecretString>, u64) {
        let guard = self.tokens.read().await;
        let generation = self.generation.load(Ordering::Acquire);
        (guard.as_ref().map(|t| t.access_token.clone()), generation)
    }

    /// Whether the stored access token is about to expire and can be refreshed.
    pub(super) async fn needs_refresh(&self) -> bool {
        self.tokens
            .read()
            .await
            .as_ref()
            .is_some_and(|t| t.is_expired() && t.can_refresh())
    }

    /// Refresh the tokens unless they changed since `seen_generation`.
    ///
    /// On failure the tokens are cleared and `Unauthorized` is returned.
    #[instrument(skip(self, client, base_url))]
    pub(super) async fn refresh_after(
        &self,
        client: &reqwest::Client,
        base_url: &Url,
        seen_generation: u64,
    ) -> Result<(), ApiError> {
        let _gate = self.refresh_gate.lock().await;

        if self.generation.load(Ordering::Acquire) != seen_generation {
            debug!("Tokens already refreshed by a concurrent request");
            return Ok(());
        }

        let refresh_token = self
            .tokens
            .read()
            .await
            .as_ref()
            .and_then(|t| t.refresh_token.clone());

        let Some(refresh_token) = refresh_token else {
            self.set(None).await;
            return Err(ApiError::Unauthorized(
                "session expired and no refresh token is available".to_string(),
            ));
        };

        match request_refresh(client, base_url, &refresh_token).await {
            Ok(response) => {
                let tokens = AuthTokens {
                    access_token: SecretString::from(response.access_token),
                    refresh_token: response
                        .refresh_token
                        .map(SecretString::from)
                        .or(Some(refresh_token)),
                    expires_in: response.expires_in,
                    obtained_at: Utc::now().timestamp(),
                };
                self.set(Some(tokens)).await;
                debug!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session tokens");
                self.set(None).await;
                Err(ApiError::Unauthorized(format!("token refresh failed: {e}")))
            }
        }
    }
}

async fn request_refresh(
    client: &reqwest::Client,
    base_url: &Url,
    refresh_token: &SecretString,
) -> Result<TokenResponse, ApiError> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|()| ApiError::InvalidBaseUrl(base_url.to_string()))?
        .pop_if_empty()
        .extend(["auth", "refresh"]);

    let response = client
        .post(url)
        .json(&RefreshRequest {
            refresh_token: refresh_token.expose_secret(),
        })
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: text.chars().take(200).collect(),
        });
    }

    serde_json::from_str::<TokenEnvelope>(&text)
        .map(TokenEnvelope::into_inner)
        .map_err(|source| ApiError::Parse {
            context: "token refresh",
            source,
        })
}
