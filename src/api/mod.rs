//! Backend HTTP API.

pub mod client;

pub use client::{ApiClient, ApiClientConfig, ApiError};
