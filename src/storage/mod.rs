//! Key/value persistence behind the fallback mirror.
//!
//! The mirror layout itself lives in [`fallback`]; the backends here only
//! know how to get, set and clear string values by key.

pub mod fallback;
pub mod memory;
pub mod postgres;
pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageResult;

pub use fallback::{FallbackStore, MirrorMetadata};
pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Minimal string key/value store, modelled on browser local storage.
///
/// Writes to a single key are atomic; nothing larger is.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove every key.
    async fn clear(&self) -> StorageResult<()>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set(key, value).await
    }

    async fn clear(&self) -> StorageResult<()> {
        (**self).clear().await
    }
}
