use serde::Serialize;

use crate::models::User;

/// Lifecycle of the session.
///
/// `Uninitialized` at process start, `Checking` while stored credentials are
/// read, then one of the two settled states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum AuthState {
    #[default]
    Uninitialized,
    Checking,
    Authenticated,
    Unauthenticated,
}

impl AuthState {
    pub fn is_settled(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Unauthenticated)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AuthState::Uninitialized => "uninitialized",
            AuthState::Checking => "checking",
            AuthState::Authenticated => "authenticated",
            AuthState::Unauthenticated => "unauthenticated",
        }
    }
}

/// What observers of the session see.
///
/// `token` present implies `user` present. The token is never serialized or
/// printed.
#[derive(Clone, PartialEq, Default, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SessionSnapshot {
    pub state: AuthState,
    pub user: Option<User>,
    #[serde(skip)]
    pub token: Option<String>,
    pub is_loading: bool,
}

impl std::fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("state", &self.state)
            .field("user", &self.user.as_ref().map(|u| &u.username))
            .field("has_token", &self.token.is_some())
            .field("is_loading", &self.is_loading)
            .finish()
    }
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }
}
