use chrono::{DateTime, Duration, Utc};

use crate::models::User;
use crate::storage::{CredentialStore, StorageError};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_DATA_KEY: &str = "userData";
pub const ISSUED_AT_KEY: &str = "tokenIssuedAt";

/// Every key a session writes; cleared together.
pub const SESSION_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY, ISSUED_AT_KEY];

/// Access token lifetime in minutes, matching the backend's JWT settings.
const TOKEN_EXPIRY_MINUTES: i64 = 60;

/// Buffer time before expiry to trigger refresh (5 minutes)
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// Tokens and user data as persisted between runs.
#[derive(Clone, PartialEq)]
pub struct PersistedCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: User,
    /// When the access token was issued; absent for credentials written by
    /// clients that did not record it.
    pub issued_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for PersistedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedCredentials")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("user", &self.user)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl PersistedCredentials {
    pub fn new(access_token: String, refresh_token: Option<String>, user: User) -> Self {
        Self {
            access_token,
            refresh_token,
            user,
            issued_at: Some(Utc::now()),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.issued_at
            .map(|issued| Utc::now() > issued + Duration::minutes(TOKEN_EXPIRY_MINUTES))
            .unwrap_or(false)
    }

    /// Check if the access token will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        self.issued_at
            .map(|issued| {
                let refresh_at =
                    issued + Duration::minutes(TOKEN_EXPIRY_MINUTES - TOKEN_REFRESH_BUFFER_MINUTES);
                Utc::now() > refresh_at
            })
            .unwrap_or(false)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.issued_at.map(|issued| {
            let expiry = issued + Duration::minutes(TOKEN_EXPIRY_MINUTES);
            (expiry - Utc::now()).num_minutes().max(0)
        })
    }

    /// Read credentials from the store.
    ///
    /// Returns `None` unless both a token and user data are present. Corrupt
    /// user data is an error; an unparseable issue timestamp is ignored.
    pub async fn load(store: &dyn CredentialStore) -> Result<Option<Self>, StorageError> {
        let Some(access_token) = store.get(ACCESS_TOKEN_KEY).await? else {
            return Ok(None);
        };
        let Some(user_data) = store.get(USER_DATA_KEY).await? else {
            return Ok(None);
        };
        let user: User = serde_json::from_str(&user_data)?;
        let refresh_token = store.get(REFRESH_TOKEN_KEY).await?;
        let issued_at = store
            .get(ISSUED_AT_KEY)
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Some(Self {
            access_token,
            refresh_token,
            user,
            issued_at,
        }))
    }

    /// Write every entry; stale optional entries are removed.
    pub async fn save(&self, store: &dyn CredentialStore) -> Result<(), StorageError> {
        let mut entries = vec![
            (ACCESS_TOKEN_KEY, self.access_token.clone()),
            (USER_DATA_KEY, serde_json::to_string(&self.user)?),
        ];
        let mut stale = Vec::new();
        match self.refresh_token {
            Some(ref refresh) => entries.push((REFRESH_TOKEN_KEY, refresh.clone())),
            None => stale.push(REFRESH_TOKEN_KEY),
        }
        match self.issued_at {
            Some(issued) => entries.push((ISSUED_AT_KEY, issued.to_rfc3339())),
            None => stale.push(ISSUED_AT_KEY),
        }

        store.multi_set(&entries).await?;
        if !stale.is_empty() {
            store.remove(&stale).await?;
        }
        Ok(())
    }

    /// Replace only the stored user object.
    pub async fn save_user(store: &dyn CredentialStore, user: &User) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(user)?;
        store.set(USER_DATA_KEY, &encoded).await
    }

    pub async fn clear(store: &dyn CredentialStore) -> Result<(), StorageError> {
        store.remove(&SESSION_KEYS).await
    }
}
