//! REST API client module for the AbrenCare backend.
//!
//! This module provides the `ApiClient` for the account endpoints (login,
//! registration, logout, token refresh, profile) and the `ApiError`
//! classification every failed request is normalized into.
//!
//! The API uses JWT bearer token authentication; tokens are read from the
//! credential store on every request.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
