//! Per-job key/value store.

use crate::store::StoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// JSON values keyed by name, scoped to one job.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn store_value(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;

    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;
}

impl dyn KvStore {
    /// Serialize and store a value.
    pub async fn store<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value =
            serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store_value(key, value).await
    }

    /// Load and deserialize a value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_value(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}
