use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::storage::KvStorageInterface;

/// An in-memory [KvStorageInterface] backed by a [DashMap].
#[derive(Debug, Default)]
pub struct MemStorage<V>
where V: Clone
{
    table: DashMap<String, V>,
}

impl<V> MemStorage<V>
where V: Clone
{
    /// Create an empty storage.
    pub fn new() -> Self {
        Self {
            table: DashMap::default(),
        }
    }
}

#[async_trait]
impl<V> KvStorageInterface<V> for MemStorage<V>
where V: Clone + Send + Sync
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        Ok(self.table.get(&key.to_string()).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: &V) -> Result<()> {
        self.table.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<(String, V)>> {
        Ok(self
            .table
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.table.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.table.clear();
        Ok(())
    }

    async fn count(&self) -> Result<u32> {
        Ok(self.table.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::Did;

    #[tokio::test]
    async fn memstorage_basic_interface_should_work() {
        let store = MemStorage::new();
        let key = Did::hash_key(b"memstorage", 224).unwrap().to_string();

        assert_eq!(store.get(&key).await.unwrap(), None);

        store.put(&key, &"value 1".to_string()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some("value 1".into()));

        store.put(&key, &"value 2".to_string()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some("value 2".into()));
        assert_eq!(store.count().await.unwrap(), 1);

        store.remove(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }
}
