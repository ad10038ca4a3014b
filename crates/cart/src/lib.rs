//! Harvest cart library.
//!
//! A dual-mode shopping cart for the Harvest grocery storefront: guests keep
//! their cart on the device, signed-in customers use the server cart, and the
//! guest cart is merged into the server cart once at sign-in.
//!
//! # Modules
//!
//! - [`local`] - Persistent guest cart keyed by composite line identity
//! - [`api`] - Server cart HTTP client with envelope normalization and token refresh
//! - [`merge`] - Guest-to-server cart merge
//! - [`session`] - The cart consumers use: modes, optimistic updates, offline guard
//! - [`retry`] - Bounded exponential backoff for API calls
//! - [`network`] - Online/offline flag
//! - [`config`] - Environment configuration
//! - [`error`] - Unified error type

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod config;
pub mod error;
pub mod local;
pub mod merge;
pub mod network;
pub mod retry;
pub mod session;

pub use api::{AuthTokens, CartClient, RequestContext, ServerCart};
pub use config::HarvestConfig;
pub use error::{CartError, Result};
pub use local::{LocalCartStore, SharedLocalCart};
pub use merge::{MergeError, MergeOutcome};
pub use network::Connectivity;
pub use session::{CartMode, CartSession, CartView, SessionOptions};
