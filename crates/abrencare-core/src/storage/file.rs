use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use futures::future::BoxFuture;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CredentialStore, StorageError};

/// Credential file name in the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Bump when the sealed layout changes.
const FILE_VERSION: u8 = 1;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
struct SealedFile {
    version: u8,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

struct DerivedKey {
    salt: Vec<u8>,
    key: [u8; KEY_LEN],
}

/// Encrypted single-file backend.
///
/// All entries live in one JSON map sealed with ChaCha20-Poly1305. The key is
/// derived from the passphrase with Argon2 and a random per-file salt, then
/// cached for the life of the store. A fresh nonce is drawn for every write.
///
/// Reads of a file that cannot be decrypted fail with `StorageError::Crypto`.
/// Writes replace such a file, starting from an empty map and a new salt, so
/// a changed passphrase or a corrupted file never blocks logout or login.
pub struct EncryptedFileStore {
    path: PathBuf,
    passphrase: String,
    key: Mutex<Option<DerivedKey>>,
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileStore {
    /// Store credentials in `credentials.json` under `dir`.
    pub fn new(dir: impl AsRef<Path>, passphrase: impl Into<String>) -> Self {
        Self::at_path(dir.as_ref().join(CREDENTIALS_FILE), passphrase)
    }

    pub fn at_path(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: passphrase.into(),
            key: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<DerivedKey>>, StorageError> {
        self.key
            .lock()
            .map_err(|_| StorageError::Backend("file store lock poisoned".to_string()))
    }

    fn key_for(
        &self,
        cache: &mut Option<DerivedKey>,
        salt: &[u8],
    ) -> Result<[u8; KEY_LEN], StorageError> {
        if let Some(derived) = cache.as_ref() {
            if derived.salt == salt {
                return Ok(derived.key);
            }
        }
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StorageError::Crypto(e.to_string()))?;
        *cache = Some(DerivedKey {
            salt: salt.to_vec(),
            key,
        });
        Ok(key)
    }

    fn read_entries(
        &self,
        cache: &mut Option<DerivedKey>,
    ) -> Result<HashMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let contents = std::fs::read_to_string(&self.path)?;
        let sealed: SealedFile = serde_json::from_str(&contents)?;
        if sealed.version != FILE_VERSION {
            return Err(StorageError::Crypto(format!(
                "unsupported credential file version {}",
                sealed.version
            )));
        }
        if sealed.nonce.len() != NONCE_LEN {
            return Err(StorageError::Crypto("invalid nonce length".to_string()));
        }

        let key = self.key_for(cache, &sealed.salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
            .map_err(|_| StorageError::Crypto("wrong passphrase or corrupted file".to_string()))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn write_entries(
        &self,
        cache: &mut Option<DerivedKey>,
        entries: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        let salt = match cache.as_ref() {
            Some(derived) => derived.salt.clone(),
            None => {
                let mut salt = vec![0u8; SALT_LEN];
                rand::thread_rng().fill_bytes(&mut salt);
                salt
            }
        };
        let key = self.key_for(cache, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let plaintext = serde_json::to_vec(entries)?;
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| StorageError::Crypto("encryption failed".to_string()))?;

        let sealed = SealedFile {
            version: FILE_VERSION,
            salt,
            nonce: nonce.to_vec(),
            ciphertext,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(&sealed)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), entries = entries.len(), "Wrote credential file");
        Ok(())
    }

    fn update<F>(&self, apply: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let mut cache = self.lock()?;
        let mut entries = match self.read_entries(&mut cache) {
            Ok(entries) => entries,
            Err(e @ (StorageError::Crypto(_) | StorageError::Serialization(_))) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable credential file, replacing it");
                *cache = None;
                HashMap::new()
            }
            Err(e) => return Err(e),
        };
        apply(&mut entries);
        self.write_entries(&mut cache, &entries)
    }
}

impl CredentialStore for EncryptedFileStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
        Box::pin(async move {
            let mut cache = self.lock()?;
            Ok(self.read_entries(&mut cache)?.remove(key))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.update(|entries| {
                entries.insert(key.to_string(), value.to_string());
            })
        })
    }

    fn multi_set<'a>(
        &'a self,
        entries: &'a [(&'a str, String)],
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.update(|map| {
                for (key, value) in entries {
                    map.insert((*key).to_string(), value.clone());
                }
            })
        })
    }

    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.update(|map| {
                for key in keys {
                    map.remove(*key);
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), "pass");
        assert_eq!(store.get("accessToken").await.unwrap(), None);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = EncryptedFileStore::new(dir.path(), "pass");
            let entries = [
                ("accessToken", "tok".to_string()),
                ("userData", r#"{"id":"1","username":"alice"}"#.to_string()),
            ];
            store.multi_set(&entries).await.unwrap();
        }

        let reopened = EncryptedFileStore::new(dir.path(), "pass");
        assert_eq!(reopened.get("accessToken").await.unwrap().as_deref(), Some("tok"));

        let raw = std::fs::read_to_string(reopened.path()).unwrap();
        assert!(!raw.contains("tok"));
        assert!(!raw.contains("alice"));
    }

    #[tokio::test]
    async fn test_wrong_passphrase_is_crypto_error() {
        let dir = tempfile::tempdir().unwrap();
        EncryptedFileStore::new(dir.path(), "right")
            .set("accessToken", "tok")
            .await
            .unwrap();

        let err = EncryptedFileStore::new(dir.path(), "wrong")
            .get("accessToken")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Crypto(_)));
    }

    #[tokio::test]
    async fn test_wrong_passphrase_does_not_block_writes() {
        let dir = tempfile::tempdir().unwrap();
        EncryptedFileStore::new(dir.path(), "right")
            .set("accessToken", "tok")
            .await
            .unwrap();

        let store = EncryptedFileStore::new(dir.path(), "wrong");
        store.remove(&["accessToken", "userData"]).await.unwrap();
        assert!(!store.path().exists());

        EncryptedFileStore::new(dir.path(), "right")
            .set("accessToken", "old")
            .await
            .unwrap();
        store.set("accessToken", "new").await.unwrap();
        assert_eq!(store.get("accessToken").await.unwrap().as_deref(), Some("new"));

        let err = EncryptedFileStore::new(dir.path(), "right")
            .get("accessToken")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Crypto(_)));
    }

    #[tokio::test]
    async fn test_corrupted_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), "pass");
        std::fs::write(store.path(), "not json at all").unwrap();

        assert!(matches!(
            store.get("accessToken").await.unwrap_err(),
            StorageError::Serialization(_)
        ));

        store.set("accessToken", "tok").await.unwrap();
        assert_eq!(store.get("accessToken").await.unwrap().as_deref(), Some("tok"));

        std::fs::write(store.path(), "not json at all").unwrap();
        store.remove(&["accessToken"]).await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_removing_everything_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path(), "pass");
        store.set("accessToken", "tok").await.unwrap();
        assert!(store.path().exists());

        store.remove(&["accessToken"]).await.unwrap();
        assert!(!store.path().exists());
        assert_eq!(store.get("accessToken").await.unwrap(), None);
    }
}
