use thiserror::Error;

use crate::api::ApiError;
use crate::storage::StorageError;

use super::AuthState;

/// Reply the backend's login view gives for a bad username/password pair.
const BACKEND_INVALID_CREDENTIALS: &str = "invalid credentials";

/// Errors returned by session operations to the presentation layer.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Login failed: {0}")]
    LoginFailed(#[source] ApiError),

    #[error("{0}")]
    UsernameTaken(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(#[source] ApiError),

    #[error("Session refresh failed: {0}")]
    RefreshFailed(#[source] ApiError),

    #[error("Not authenticated")]
    NotAuthenticated,

    /// The credential store rejected a write; the session was not kept.
    #[error("Could not save session: {0}")]
    Storage(#[source] StorageError),

    #[error("Another session operation is already in progress")]
    Busy,

    #[error("Cannot {operation} while {}", .state.display_name())]
    InvalidState {
        operation: &'static str,
        state: AuthState,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SessionError {
    /// Classify a failed login request.
    pub(crate) fn from_login(error: ApiError) -> Self {
        match error {
            ApiError::Unauthorized { message } => SessionError::InvalidCredentials(message),
            ApiError::Validation { message, .. }
                if message.trim().eq_ignore_ascii_case(BACKEND_INVALID_CREDENTIALS) =>
            {
                SessionError::InvalidCredentials(message)
            }
            ApiError::Validation { message, .. } => SessionError::BadRequest(message),
            other => SessionError::LoginFailed(other),
        }
    }

    /// Classify a failed registration request.
    pub(crate) fn from_register(error: ApiError) -> Self {
        if let Some(message) = error.field_errors("username").and_then(|m| m.first()) {
            return SessionError::UsernameTaken(message.clone());
        }
        SessionError::RegistrationFailed(error)
    }

    /// True when the failure was a missing network path; worth a retry prompt.
    pub fn is_network(&self) -> bool {
        match self {
            SessionError::LoginFailed(e)
            | SessionError::RegistrationFailed(e)
            | SessionError::RefreshFailed(e)
            | SessionError::Api(e) => e.is_network(),
            _ => false,
        }
    }
}
