//! Taleem API - authenticated REST operations for the messaging core
//!
//! This crate holds the wire data model shared by the REST and push layers,
//! and the durable write path: the authoritative request/response client that
//! persists messages server-side regardless of push-channel health.

mod client;
mod error;
mod models;

pub use client::ApiClient;
pub use error::ApiError;
pub use models::*;
