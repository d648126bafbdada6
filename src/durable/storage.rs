//! Key/value storage backing a durable object.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage value error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Options for [`Storage::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
    /// Descending key order.
    pub reverse: bool,
}

impl ListOptions {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// Storage attached to one durable object id.
///
/// The batch operations default to looping over the single-key ones.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Entries in key order.
    async fn list(&self, options: ListOptions) -> Result<Vec<(String, Value)>, StorageError>;

    /// Present keys only.
    async fn get_many(&self, keys: &[String]) -> Result<BTreeMap<String, Value>, StorageError> {
        let mut found = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn put_many(&self, entries: BTreeMap<String, Value>) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.put(&key, value).await?;
        }
        Ok(())
    }

    /// Returns how many keys existed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, StorageError> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

impl<'s> dyn Storage + 's {
    /// Read and deserialize a value.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value.
    pub async fn put_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.put(key, serde_json::to_value(value)?).await
    }
}

/// In-process storage. Contents live as long as the value.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.lock().remove(key).is_some())
    }

    async fn list(&self, options: ListOptions) -> Result<Vec<(String, Value)>, StorageError> {
        let entries = self.lock();
        let prefix = options.prefix.as_deref().unwrap_or("");
        let matching = entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()));

        let mut listed: Vec<_> = if options.reverse {
            let mut all: Vec<_> = matching.collect();
            all.reverse();
            all
        } else {
            matching.collect()
        };
        if let Some(limit) = options.limit {
            listed.truncate(limit);
        }
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn storage() -> Arc<dyn Storage> {
        Arc::new(MemoryStorage::new())
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = storage();
        storage.put("a", json!(1)).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some(json!(1)));
        assert!(storage.delete("a").await.unwrap());
        assert!(!storage.delete("a").await.unwrap());
        assert_eq!(storage.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let storage = storage();
        storage
            .put_many(BTreeMap::from([
                ("k1".to_string(), json!("one")),
                ("k2".to_string(), json!("two")),
            ]))
            .await
            .unwrap();

        let keys = vec!["k1".to_string(), "k2".to_string(), "k3".to_string()];
        let found = storage.get_many(&keys).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(storage.delete_many(&keys).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_prefix_limit_reverse() {
        let storage = storage();
        for key in ["user:1", "user:2", "user:3", "session:1"] {
            storage.put(key, json!(key)).await.unwrap();
        }

        let users = storage.list(ListOptions::prefix("user:")).await.unwrap();
        let keys: Vec<_> = users.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["user:1", "user:2", "user:3"]);

        let last = storage
            .list(ListOptions::prefix("user:").reversed().with_limit(1))
            .await
            .unwrap();
        assert_eq!(last[0].0, "user:3");

        assert_eq!(storage.list(ListOptions::default()).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Profile {
            display_name: String,
        }

        let storage = storage();
        let profile = Profile {
            display_name: "John Doe".into(),
        };
        storage.put_as("profile", &profile).await.unwrap();
        assert_eq!(storage.get_as::<Profile>("profile").await.unwrap(), Some(profile));

        storage.put("bad", json!(42)).await.unwrap();
        assert!(matches!(
            storage.get_as::<Profile>("bad").await,
            Err(StorageError::Serde(_))
        ));
    }
}
