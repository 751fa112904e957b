//! Storage of the overlay: the key value interface, its in-memory backend and the
//! replicated store built on them.

pub mod crypto;
pub mod memory;
pub mod store;

use async_trait::async_trait;

use crate::error::Result;
pub use crate::storage::memory::MemStorage;
pub use crate::storage::store::FileStore;
pub use crate::storage::store::ItemStorage;
pub use crate::storage::store::StoreConfig;
pub use crate::storage::store::StoreStatus;
pub use crate::storage::store::StoredItem;

/// Key value storage interface
#[async_trait]
pub trait KvStorageInterface<V> {
    /// Get a cache entry by `key`.
    async fn get(&self, key: &str) -> Result<Option<V>>;

    /// Put `entry` in the cache under `key`.
    async fn put(&self, key: &str, value: &V) -> Result<()>;

    /// All entries.
    async fn get_all(&self) -> Result<Vec<(String, V)>>;

    /// Remove an `entry` by `key`.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Delete all values.
    async fn clear(&self) -> Result<()>;

    /// Get the current storage usage.
    async fn count(&self) -> Result<u32>;
}
