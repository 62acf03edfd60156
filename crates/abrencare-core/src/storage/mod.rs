//! Persistent credential storage.
//!
//! `CredentialStore` is the async key-value contract the session manager and
//! the HTTP client's interceptors persist tokens through. Three backends are
//! provided:
//!
//! - `KeyringStore`: one OS keychain entry per key
//! - `EncryptedFileStore`: a ChaCha20-Poly1305 sealed JSON file
//! - `MemoryStore`: process memory, for tests and throwaway sessions
//!
//! Store failures are reported as `StorageError`; callers log them and treat
//! the session as absent rather than propagating them to the UI.

pub mod file;
pub mod keyring;
pub mod memory;

use std::sync::Arc;

use anyhow::Context;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, StoreBackend};

pub use self::file::EncryptedFileStore;
pub use self::keyring::KeyringStore;
pub use self::memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Credential backend error: {0}")]
    Backend(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored value is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Could not decrypt credential file: {0}")]
    Crypto(String),
}

/// Async key-value persistence for session credentials.
///
/// Implementations must be safe to share between the session manager and the
/// API client. Every operation may suspend.
pub trait CredentialStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>>;

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Write several entries. Backends that can write atomically override this.
    fn multi_set<'a>(
        &'a self,
        entries: &'a [(&'a str, String)],
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            for (key, value) in entries {
                self.set(key, value).await?;
            }
            Ok(())
        })
    }

    /// Remove the given keys. Missing keys are not an error.
    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<(), StorageError>>;
}

/// Open the store `config` selects.
pub fn open_store(config: &Config) -> anyhow::Result<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match config.store {
        StoreBackend::Keyring => Arc::new(KeyringStore::new()),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => {
            let passphrase = config
                .store_passphrase
                .clone()
                .filter(|p| !p.is_empty())
                .context("ABRENCARE_STORE_PASSPHRASE is required for the file credential store")?;
            Arc::new(EncryptedFileStore::new(config.data_dir()?, passphrase))
        }
    };
    debug!(backend = ?config.store, "Opened credential store");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_requires_passphrase() {
        let config = Config {
            store: StoreBackend::File,
            ..Config::default()
        };
        let err = open_store(&config).err().unwrap();
        assert!(err.to_string().contains("ABRENCARE_STORE_PASSPHRASE"));
    }

    #[tokio::test]
    async fn test_memory_store_opens_empty() {
        let config = Config {
            store: StoreBackend::Memory,
            ..Config::default()
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.get("accessToken").await.unwrap(), None);
    }
}
