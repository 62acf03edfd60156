//! The session manager: sole owner and writer of the session state.

use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::models::{ProfileUpdate, RegisterRequest, User};
use crate::storage::{CredentialStore, StorageError};

use super::credentials::PersistedCredentials;
use super::{AuthState, SessionError, SessionSnapshot};

/// Orchestrates login, registration, logout and token refresh.
///
/// State changes are published on a `watch` channel; observers such as the
/// route guard hold receivers from `subscribe()`. Mutating operations are
/// serialized through a single in-flight slot and a second call made while
/// one is pending fails with `SessionError::Busy`.
///
/// The manager attaches itself to its `ApiClient`, so a 401 seen through any
/// clone of that client also ends the published session.
pub struct SessionManager {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
    state: Arc<watch::Sender<SessionSnapshot>>,
    in_flight: Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("api", &self.api)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Holds the in-flight slot for one operation; clears the loading flag on drop.
struct Operation<'a> {
    state: &'a watch::Sender<SessionSnapshot>,
    _slot: MutexGuard<'a, ()>,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|s| s.is_loading = false);
    }
}

impl SessionManager {
    /// `store` must be the same store `api` was built with, so the response
    /// interceptor and the manager agree on what is persisted.
    pub fn new(api: ApiClient, store: Arc<dyn CredentialStore>) -> Self {
        let state = Arc::new(watch::channel(SessionSnapshot::default()).0);
        api.attach_session(&state);
        Self {
            api,
            store,
            state,
            in_flight: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Backend origin the session talks to.
    pub fn origin(&self) -> &str {
        self.api.base_url()
    }

    fn begin(&self, operation: &'static str) -> Result<Operation<'_>, SessionError> {
        let slot = self.in_flight.try_lock().map_err(|_| {
            debug!(operation, "Rejecting session operation, another is in flight");
            SessionError::Busy
        })?;
        self.state.send_modify(|s| s.is_loading = true);
        Ok(Operation {
            state: &self.state,
            _slot: slot,
        })
    }

    fn ensure_state(&self, operation: &'static str, allowed: &[AuthState]) -> Result<(), SessionError> {
        let state = self.state.borrow().state;
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState { operation, state })
        }
    }

    fn publish_state(&self, state: AuthState) {
        self.state.send_modify(|s| s.state = state);
    }

    fn publish_authenticated(&self, credentials: &PersistedCredentials) {
        self.state.send_modify(|s| {
            s.state = AuthState::Authenticated;
            s.user = Some(credentials.user.clone());
            s.token = Some(credentials.access_token.clone());
        });
    }

    fn publish_unauthenticated(&self) {
        self.state.send_modify(|s| {
            s.state = AuthState::Unauthenticated;
            s.user = None;
            s.token = None;
        });
    }

    /// Drop a session the store could not hold, so nothing observes an
    /// authenticated state that a restart would lose.
    async fn abandon_session(&self, error: StorageError) -> SessionError {
        warn!(error = %error, "Failed to persist session, ending it");
        if let Err(e) = PersistedCredentials::clear(self.store.as_ref()).await {
            warn!(error = %e, "Failed to clear partially written credentials");
        }
        self.publish_unauthenticated();
        SessionError::Storage(error)
    }

    /// Restore a persisted session.
    ///
    /// Any store failure is logged and treated as "no session".
    pub async fn check_auth_status(&self) -> Result<AuthState, SessionError> {
        let _op = self.begin("check auth status")?;
        self.publish_state(AuthState::Checking);

        match PersistedCredentials::load(self.store.as_ref()).await {
            Ok(Some(credentials)) => {
                debug!(username = %credentials.user.username, "Restored stored session");
                self.publish_authenticated(&credentials);
            }
            Ok(None) => {
                debug!("No stored session found");
                self.publish_unauthenticated();
            }
            Err(e) => {
                warn!(error = %e, "Failed to load stored session, starting unauthenticated");
                self.publish_unauthenticated();
            }
        }

        let state = self.state.borrow().state;
        Ok(state)
    }

    /// Log in from a settled, unauthenticated session.
    ///
    /// `check_auth_status` holds the in-flight slot while `Checking`, so a
    /// login attempted during the startup check fails with `Busy`.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, SessionError> {
        let _op = self.begin("log in")?;
        self.ensure_state("log in", &[AuthState::Unauthenticated])?;
        self.login_inner(username, password).await
    }

    /// Create an account, then log into it with the same credentials.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<User, SessionError> {
        let _op = self.begin("register")?;
        self.ensure_state("register", &[AuthState::Unauthenticated])?;

        if username.trim().is_empty() || password.is_empty() {
            return Err(SessionError::BadRequest("Username and password required".to_string()));
        }

        let registration = RegisterRequest {
            username,
            password,
            email: email.filter(|e| !e.trim().is_empty()),
        };
        if let Err(e) = self.api.register(&registration).await {
            warn!(username, error = %e, "Registration failed");
            return Err(SessionError::from_register(e));
        }

        info!(username, "Registration succeeded, logging in");
        self.login_inner(username, password).await
    }

    async fn login_inner(&self, username: &str, password: &str) -> Result<User, SessionError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(SessionError::BadRequest("Username and password required".to_string()));
        }

        let response = match self.api.login(username, password).await {
            Ok(response) => response,
            Err(e) => {
                warn!(username, error = %e, "Login failed");
                self.publish_unauthenticated();
                return Err(SessionError::from_login(e));
            }
        };

        let credentials = PersistedCredentials::new(response.access, response.refresh, response.user);

        // Persist before publishing
        if let Err(e) = credentials.save(self.store.as_ref()).await {
            return Err(self.abandon_session(e).await);
        }
        self.publish_authenticated(&credentials);

        info!(username = %credentials.user.username, "Login successful");
        Ok(credentials.user)
    }

    /// End the session.
    ///
    /// The server call is best effort and bounded by the logout timeout; local
    /// state is cleared whatever it returns.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let _op = self.begin("log out")?;

        let has_token = self.state.borrow().token.is_some();
        if has_token {
            if let Err(e) = self.api.logout().await {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        } else {
            debug!("No active token, skipping server logout");
        }

        if let Err(e) = PersistedCredentials::clear(self.store.as_ref()).await {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        self.publish_unauthenticated();
        info!("Logged out");
        Ok(())
    }

    /// Exchange the stored refresh token for a new access token.
    pub async fn refresh_token(&self) -> Result<(), SessionError> {
        let _op = self.begin("refresh token")?;
        self.ensure_state("refresh token", &[AuthState::Authenticated])?;
        let credentials = self.load_credentials().await?;
        self.refresh_inner(credentials).await
    }

    /// Refresh only when the access token is close to expiry.
    /// Returns whether a refresh happened.
    pub async fn refresh_if_needed(&self) -> Result<bool, SessionError> {
        let _op = self.begin("refresh token")?;
        self.ensure_state("refresh token", &[AuthState::Authenticated])?;
        let credentials = self.load_credentials().await?;
        if !credentials.needs_refresh() {
            debug!(minutes_left = ?credentials.minutes_until_expiry(), "Token still valid, no refresh needed");
            return Ok(false);
        }
        self.refresh_inner(credentials).await?;
        Ok(true)
    }

    /// Whether the stored access token is within its refresh window.
    pub async fn needs_refresh(&self) -> bool {
        match PersistedCredentials::load(self.store.as_ref()).await {
            Ok(Some(credentials)) => credentials.needs_refresh(),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                false
            }
        }
    }

    async fn load_credentials(&self) -> Result<PersistedCredentials, SessionError> {
        match PersistedCredentials::load(self.store.as_ref()).await {
            Ok(Some(credentials)) => Ok(credentials),
            Ok(None) => Err(SessionError::NotAuthenticated),
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                Err(SessionError::NotAuthenticated)
            }
        }
    }

    async fn refresh_inner(&self, credentials: PersistedCredentials) -> Result<(), SessionError> {
        let Some(refresh_token) = credentials.refresh_token.clone() else {
            debug!("No refresh token stored");
            return Err(SessionError::NotAuthenticated);
        };

        match self.api.refresh_token(&refresh_token).await {
            Ok(response) => {
                let refreshed = PersistedCredentials::new(
                    response.access,
                    response.refresh.or(Some(refresh_token)),
                    credentials.user,
                );
                if let Err(e) = refreshed.save(self.store.as_ref()).await {
                    return Err(self.abandon_session(e).await);
                }
                self.publish_authenticated(&refreshed);
                info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                if e.is_unauthorized() {
                    warn!("Refresh token rejected, ending session");
                    self.publish_unauthenticated();
                }
                Err(SessionError::RefreshFailed(e))
            }
        }
    }

    /// Fetch and persist the full profile of the logged-in user.
    ///
    /// A 401 ends the in-memory session so observers can redirect to login.
    pub async fn fetch_profile(&self) -> Result<User, SessionError> {
        let _op = self.begin("fetch profile")?;
        if !self.state.borrow().is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        let result = self.api.fetch_profile().await;
        self.apply_profile(result).await
    }

    /// Send a partial profile change for the logged-in user and keep the
    /// profile the backend returns.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, SessionError> {
        let _op = self.begin("update profile")?;
        let id = self.state.borrow().user().map(|u| u.id.clone());
        let Some(id) = id else {
            return Err(SessionError::NotAuthenticated);
        };
        if update.is_empty() {
            return Err(SessionError::BadRequest("No profile changes given".to_string()));
        }
        let result = self.api.update_profile(&id, update).await;
        self.apply_profile(result).await
    }

    async fn apply_profile(&self, result: Result<User, ApiError>) -> Result<User, SessionError> {
        match result {
            Ok(user) => {
                if let Err(e) = PersistedCredentials::save_user(self.store.as_ref(), &user).await {
                    warn!(error = %e, "Failed to persist profile");
                }
                self.state.send_modify(|s| s.user = Some(user.clone()));
                Ok(user)
            }
            Err(e) => {
                if e.is_unauthorized() {
                    self.publish_unauthenticated();
                }
                Err(SessionError::Api(e))
            }
        }
    }
}
