//! Session client for the AbrenCare health-tracking backend.
//!
//! The crate owns the authentication lifecycle of a client application:
//!
//! - [`storage`]: persistent credential stores behind the async
//!   [`CredentialStore`](storage::CredentialStore) contract
//! - [`api`]: the HTTP client core with its token-injecting request
//!   interceptor and error-normalizing response interceptor
//! - [`auth`]: the [`SessionManager`], sole writer of the session state
//! - [`guard`]: the [`RouteGuard`] presentation layers use to gate screens
//! - [`config`]: origin selection, store backend and timeouts
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use abrencare_core::{storage, ApiClient, Config, SessionManager};
//!
//! let config = Config::load()?;
//! let store = storage::open_store(&config)?;
//! let api = ApiClient::new(&config, store.clone())?;
//! let session = SessionManager::new(api, store);
//!
//! session.check_auth_status().await?;
//! if !session.snapshot().is_authenticated() {
//!     session.login("alice", "secret").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;
pub mod models;
pub mod storage;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthState, PersistedCredentials, SessionError, SessionManager, SessionSnapshot};
pub use config::Config;
pub use guard::{GuardDecision, Navigator, RouteGuard};
pub use models::{ProfileUpdate, User};
pub use storage::{CredentialStore, StorageError};
