//! HTTP client for the device backend.
//!
//! `client` holds the transport, `types` the wire payloads, `backend` the
//! trait seams the sync engine talks through.

pub mod backend;
pub mod client;
pub mod types;

pub use backend::Backend;
pub use client::{ApiClient, ApiError};
