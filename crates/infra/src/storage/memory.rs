use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use resilink_common::error::CommonResult;
use resilink_core::KeyValueStore;

/// In-memory [`KeyValueStore`]
///
/// Contents live as long as the value; clones of an `Arc<MemoryStore>` share
/// them, which lets tests "restart" a service on the same storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_string(&self, key: &str) -> CommonResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str) -> CommonResult<()> {
        self.entries.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> CommonResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> CommonResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get_string("a").await.unwrap(), None);

        store.set_string("a", "1").await.unwrap();
        store.set_string("b", "2").await.unwrap();
        store.set_string("a", "3").await.unwrap();
        assert_eq!(store.get_string("a").await.unwrap().as_deref(), Some("3"));
        assert_eq!(store.keys().await.unwrap(), vec!["a".to_string(), "b".to_string()]);

        store.remove("a").await.unwrap();
        store.remove("missing").await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
