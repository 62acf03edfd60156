//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `SessionManager`: login/logout/register/refresh orchestration and the
//!   published session state
//! - `PersistedCredentials`: the token and user layout in the credential store
//! - `SessionError`: typed failures handed to the presentation layer
//!
//! Access tokens are issued for 60 minutes and refreshed with the stored
//! refresh token.

pub mod credentials;
pub mod error;
pub mod session;
pub mod state;

pub use credentials::PersistedCredentials;
pub use error::SessionError;
pub use session::SessionManager;
pub use state::{AuthState, SessionSnapshot};
