//! `StateStore` trait — durable load/save of one JSON document.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// A document that can live in a state store.
///
/// `Default` is the value of a store that has never been written.
pub trait Document: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

impl<T> Document for T where T: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

/// Durable persistence for a single document.
///
/// Implementations must make `save` atomic: after a crash the backing
/// storage holds either the previous snapshot or the new one, never a mix.
#[async_trait]
pub trait StateStore<T: Document>: Send + Sync {
    /// Load the stored document.
    ///
    /// A missing or empty backing file yields `T::default()`. Unparseable
    /// content yields `StoreError::Corrupt` and must never be replaced.
    async fn load(&self) -> Result<T, StoreError>;

    /// Atomically replace the stored document.
    async fn save(&self, value: &T) -> Result<(), StoreError>;

    /// Where this store lives, for log lines.
    fn location(&self) -> String;
}

/// Decode raw document text, treating whitespace-only input as empty.
pub(crate) fn decode<T: Document>(raw: &str, location: &str) -> Result<T, StoreError> {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        path: location.into(),
        reason: e.to_string(),
    })
}

/// Encode a document as pretty-printed JSON.
pub(crate) fn encode<T: Document>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))
}
