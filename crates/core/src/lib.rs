//! Harvest Core - Shared cart types.
//!
//! This crate provides the types and pure rules used across all Harvest
//! components:
//! - `cart` - Guest cart store, server cart client, merge and session
//! - `cli` - Command-line driver for the cart session
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no persistence. This keeps it lightweight and allows it to be used
//! anywhere, including a UI shell.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, money, product snapshots, option selections and
//!   composite line keys
//! - [`quantity`] - Quantity clamping, rounding and label formatting

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod quantity;
pub mod types;

pub use types::*;
