//! HTTP client for the AbrenCare backend.
//!
//! Every request goes through the same pipeline: the request interceptor
//! attaches the stored access token, the response interceptor classifies
//! failures into `ApiError` and clears stored credentials on a 401. When the
//! client is attached to a `SessionManager`, a 401 on any clone of it also
//! ends the published session.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use anyhow::Result;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::auth::credentials::{self, PersistedCredentials};
use crate::auth::{AuthState, SessionSnapshot};
use crate::config::Config;
use crate::models::{LoginResponse, ProfileUpdate, RefreshResponse, RegisterRequest, User};
use crate::storage::CredentialStore;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "login/";
const REGISTER_PATH: &str = "register/";
const LOGOUT_PATH: &str = "logout/";
const TOKEN_REFRESH_PATH: &str = "token/refresh/";
const PROFILE_PATH: &str = "profile/";

/// Authorization scheme declared by the backend's JWT settings.
const AUTH_SCHEME: &str = "Bearer";

/// API client for the AbrenCare backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: Arc<dyn CredentialStore>,
    logout_timeout: Duration,
    /// Shared by every clone; set once by the owning session manager.
    session: Arc<OnceLock<Weak<watch::Sender<SessionSnapshot>>>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("logout_timeout", &self.logout_timeout)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client for the origin `config` resolves to.
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            store,
            logout_timeout: config.logout_timeout(),
            session: Arc::new(OnceLock::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Route 401s seen by this client and all its clones into `state`.
    pub(crate) fn attach_session(&self, state: &Arc<watch::Sender<SessionSnapshot>>) {
        if self.session.set(Arc::downgrade(state)).is_err() {
            warn!("API client is already attached to a session manager");
        }
    }

    /// Drop an authenticated session after the server rejected its token.
    fn end_session(&self) {
        let Some(state) = self.session.get().and_then(Weak::upgrade) else {
            return;
        };
        state.send_if_modified(|s| {
            if s.state != AuthState::Authenticated {
                return false;
            }
            s.state = AuthState::Unauthenticated;
            s.user = None;
            s.token = None;
            true
        });
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    // ===== Interceptors =====

    /// Build the per-request headers from the stored token.
    ///
    /// A store failure sends the request unauthenticated instead of blocking it.
    async fn request_context(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        let token = match self.store.get(credentials::ACCESS_TOKEN_KEY).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token, sending request without it");
                None
            }
        };
        if let Some(token) = token {
            match header::HeaderValue::from_str(&format!("{} {}", AUTH_SCHEME, token)) {
                Ok(value) => {
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(e) => warn!(error = %e, "Stored token is not a valid header value"),
            }
        }
        headers
    }

    /// Pass successes through; classify failures, clearing credentials on 401.
    async fn intercept(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            debug!(url = %response.url(), %status, "Request succeeded");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = ApiError::from_response(status, &body);

        if error.is_unauthorized() {
            warn!("Received 401, clearing stored credentials");
            if let Err(e) = PersistedCredentials::clear(self.store.as_ref()).await {
                warn!(error = %e, "Failed to clear stored credentials after 401");
            }
            self.end_session();
        } else {
            debug!(%status, error = %error, "Request failed");
        }

        Err(error)
    }

    async fn dispatch(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let headers = self.request_context().await;
        let response = request
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                warn!(origin = %self.base_url, error = %e, "No response from server");
                ApiError::network(self.base_url.clone(), e)
            })?;
        self.intercept(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().to_string();
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", url, e)))
    }

    // ===== Account Endpoints =====

    /// Exchange username and password for a token pair and the user's identity.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let request = self
            .client
            .post(self.url(LOGIN_PATH))
            .form(&[("username", username), ("password", password)]);
        let response = self.dispatch(request).await?;
        Self::parse(response).await
    }

    pub async fn register(&self, registration: &RegisterRequest<'_>) -> Result<(), ApiError> {
        let request = self.client.post(self.url(REGISTER_PATH)).form(registration);
        self.dispatch(request).await?;
        Ok(())
    }

    /// Server-side logout, bounded by the short logout timeout.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let request = self
            .client
            .post(self.url(LOGOUT_PATH))
            .timeout(self.logout_timeout);
        self.dispatch(request).await?;
        Ok(())
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let request = self
            .client
            .post(self.url(TOKEN_REFRESH_PATH))
            .form(&[("refresh", refresh_token)]);
        let response = self.dispatch(request).await?;
        Self::parse(response).await
    }

    /// Fetch the full profile of the logged-in user.
    pub async fn fetch_profile(&self) -> Result<User, ApiError> {
        let request = self.client.get(self.url(PROFILE_PATH));
        let response = self.dispatch(request).await?;
        Self::parse(response).await
    }

    /// Partially update the profile of user `id`; returns the stored profile.
    pub async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<User, ApiError> {
        let path = format!("{}{}/", PROFILE_PATH, id);
        let request = self.client.put(self.url(&path)).form(update);
        let response = self.dispatch(request).await?;
        Self::parse(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn client_for(base_url: &str, store: Arc<MemoryStore>) -> ApiClient {
        let config = Config {
            base_url: Some(base_url.to_string()),
            ..Config::default()
        };
        ApiClient::new(&config, store).unwrap()
    }

    #[test]
    fn test_url_joining() {
        let client = client_for("http://localhost:8000/api/users/", Arc::new(MemoryStore::new()));
        assert_eq!(client.url(LOGIN_PATH), "http://localhost:8000/api/users/login/");
        assert_eq!(client.url("/profile/"), "http://localhost:8000/api/users/profile/");
    }

    #[tokio::test]
    async fn test_request_context_without_token() {
        let client = client_for("http://localhost:8000", Arc::new(MemoryStore::new()));
        assert!(client.request_context().await.get(header::AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_request_context_attaches_bearer_token() {
        let store = Arc::new(MemoryStore::new());
        store.set(credentials::ACCESS_TOKEN_KEY, "abc123").await.unwrap();
        let client = client_for("http://localhost:8000", store);

        let headers = client.request_context().await;
        assert_eq!(
            headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer abc123")
        );
    }

    #[test]
    fn test_end_session_without_manager_is_noop() {
        let client = client_for("http://localhost:8000", Arc::new(MemoryStore::new()));
        client.end_session();
    }

    #[test]
    fn test_end_session_reaches_clones() {
        let client = client_for("http://localhost:8000", Arc::new(MemoryStore::new()));
        let copy = client.clone();
        let state = Arc::new(watch::channel(SessionSnapshot {
            state: AuthState::Authenticated,
            user: Some(User::new("1", "alice")),
            token: Some("tok".to_string()),
            is_loading: false,
        })
        .0);
        client.attach_session(&state);

        copy.end_session();

        let snapshot = state.borrow();
        assert_eq!(snapshot.state, AuthState::Unauthenticated);
        assert!(snapshot.user.is_none());
        assert!(snapshot.token.is_none());
    }

    #[tokio::test]
    async fn test_request_context_skips_unusable_token() {
        let store = Arc::new(MemoryStore::new());
        store.set(credentials::ACCESS_TOKEN_KEY, "bad\ntoken").await.unwrap();
        let client = client_for("http://localhost:8000", store);
        assert!(client.request_context().await.is_empty());
    }
}
