//! In-Memory Tier
//!
//! A key-value map held in process memory. Clones share the same map, so a
//! host can keep a handle to a tier it injected into the runtime.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::CacheResult;
use super::tier::DurableTier;

/// In-memory durable tier
#[derive(Debug, Default, Clone)]
pub struct MemoryTier {
    data: Arc<RwLock<HashMap<String, String>>>,
    name: String,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            name: name.into(),
        }
    }

    /// Create a tier holding initial raw entries
    pub fn from_data(data: HashMap<String, String>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            name: "memory".to_string(),
        }
    }

    /// Insert a raw value directly, bypassing any cache store in front of it
    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().await.insert(key.into(), value.into());
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl DurableTier for MemoryTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        self.data
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.data.read().await.keys().cloned().collect())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.data.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_tier_basic() {
        let tier = MemoryTier::new();

        tier.set("key1", "value1").await.unwrap();
        assert_eq!(tier.get("key1").await.unwrap(), Some("value1".to_string()));
        assert_eq!(tier.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_tier_remove_and_clear() {
        let tier = MemoryTier::named("session");
        assert_eq!(tier.name(), "session");

        tier.set("a", "1").await.unwrap();
        tier.set("b", "2").await.unwrap();
        assert!(tier.remove("a").await.unwrap());
        assert!(!tier.remove("a").await.unwrap());
        assert_eq!(tier.keys().await.unwrap(), vec!["b".to_string()]);

        tier.clear().await.unwrap();
        assert!(tier.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_tier_clones_share_data() {
        let tier = MemoryTier::new();
        let handle = tier.clone();

        tier.set("shared", "yes").await.unwrap();
        assert_eq!(handle.get("shared").await.unwrap(), Some("yes".to_string()));
        assert_eq!(handle.len().await, 1);
    }
}
