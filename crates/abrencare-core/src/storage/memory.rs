use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use super::{CredentialStore, StorageError};

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
        Box::pin(async move { Ok(self.lock()?.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.lock()?.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn multi_set<'a>(
        &'a self,
        entries: &'a [(&'a str, String)],
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let mut map = self.lock()?;
            for (key, value) in entries {
                map.insert((*key).to_string(), value.clone());
            }
            Ok(())
        })
    }

    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let mut map = self.lock()?;
            for key in keys {
                map.remove(*key);
            }
            Ok(())
        })
    }
}
