//! Data models for AbrenCare accounts.
//!
//! - `User`: the account identity owned by the session manager
//! - `ProfileUpdate`: a partial profile change
//! - Auth payloads: `LoginResponse`, `RefreshResponse`, `RegisterRequest`

pub mod auth;
pub mod user;

pub use auth::{LoginResponse, RefreshResponse, RegisterRequest};
pub use user::{ProfileUpdate, User};
