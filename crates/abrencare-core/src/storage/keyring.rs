use futures::future::BoxFuture;
use keyring::Entry;
use tracing::debug;

use super::{CredentialStore, StorageError};

const SERVICE_NAME: &str = "abrencare";

/// OS keychain backend. Each key is stored as its own keychain entry under
/// the `abrencare` service.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Use a distinct keychain service, e.g. one per backend origin.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Entry::new(&self.service, key).map_err(backend_error)
    }
}

fn backend_error(e: keyring::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl CredentialStore for KeyringStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
        Box::pin(async move {
            match self.entry(key)?.get_password() {
                Ok(value) => Ok(Some(value)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(backend_error(e)),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.entry(key)?.set_password(value).map_err(backend_error)?;
            debug!(key, "Stored keychain entry");
            Ok(())
        })
    }

    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            remove_each(keys, |key| {
                Entry::new(&self.service, key).and_then(|entry| entry.delete_credential())
            })
        })
    }
}

/// Delete every key, even after a failure, and report the first error.
fn remove_each<F>(keys: &[&str], mut delete: F) -> Result<(), StorageError>
where
    F: FnMut(&str) -> Result<(), keyring::Error>,
{
    let mut first_error = None;
    for key in keys {
        match delete(key) {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => {
                debug!(key, error = %e, "Failed to delete keychain entry");
                first_error.get_or_insert(backend_error(e));
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_each_attempts_every_key() {
        let mut attempted = Vec::new();
        let result = remove_each(&["accessToken", "refreshToken", "userData"], |key| {
            attempted.push(key.to_string());
            match key {
                "accessToken" => Err(keyring::Error::NoStorageAccess("locked".into())),
                "refreshToken" => Err(keyring::Error::NoEntry),
                _ => Ok(()),
            }
        });

        assert_eq!(attempted, ["accessToken", "refreshToken", "userData"]);
        assert!(matches!(result, Err(StorageError::Backend(_))));
    }

    #[test]
    fn test_remove_each_ignores_missing_entries() {
        let result = remove_each(&["accessToken", "userData"], |_| Err(keyring::Error::NoEntry));
        assert!(result.is_ok());
    }
}
