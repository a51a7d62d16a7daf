//! File-backed Tier
//!
//! Stores the whole tier as one JSON object of raw strings. Used as the
//! persistent tier so cached descriptors survive restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use super::CacheResult;
use super::tier::DurableTier;

pub struct FileTier {
    path: PathBuf,
    data: RwLock<Option<HashMap<String, String>>>,
}

impl FileTier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> CacheResult<HashMap<String, String>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(HashMap::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn save(&self, data: &HashMap<String, String>) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(data)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Run `f` against the loaded map, reading the file on first access
    async fn with_data<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>) -> (R, bool),
    ) -> CacheResult<R> {
        let mut data = self.data.write().await;
        if data.is_none() {
            *data = Some(self.load().await?);
        }
        let map = data.get_or_insert_with(HashMap::new);
        let (result, dirty) = f(map);
        if dirty {
            self.save(map).await?;
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl DurableTier for FileTier {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.with_data(|map| (map.get(key).cloned(), false)).await
    }

    async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        self.with_data(|map| {
            map.insert(key.to_string(), value.to_string());
            ((), true)
        })
        .await
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        self.with_data(|map| {
            let existed = map.remove(key).is_some();
            (existed, existed)
        })
        .await
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        self.with_data(|map| (map.keys().cloned().collect(), false))
            .await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.with_data(|map| {
            map.clear();
            ((), true)
        })
        .await
    }
}

impl std::fmt::Debug for FileTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTier")
            .field("path", &self.path)
            .finish()
    }
}
