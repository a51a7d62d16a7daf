//! Descriptor discovery across roots.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use super::{Manifest, MergedDescriptor, normalize_root};
use crate::cache::{
    CACHED_DESCRIPTOR_ID, CACHED_ROOTS_ID, CacheResult, CacheStore, MANIFEST_PREFIX,
};
use crate::fetch::ResourceFetcher;

/// One root whose manifest could not be loaded.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{root}: {reason}")]
pub struct DescriptorFetchError {
    pub root: Url,
    pub reason: String,
}

/// Result of [`DescriptorRegistry::load`]. The merge covers every root that
/// succeeded even when others failed.
#[derive(Debug, Clone)]
pub struct DescriptorLoad {
    pub descriptor: Arc<MergedDescriptor>,
    pub failures: Vec<DescriptorFetchError>,
}

impl DescriptorLoad {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct DescriptorRegistry {
    fetcher: Arc<dyn ResourceFetcher>,
    cache: Arc<CacheStore>,
    manifest_file: String,
    current: RwLock<Arc<MergedDescriptor>>,
}

impl DescriptorRegistry {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        cache: Arc<CacheStore>,
        manifest_file: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            manifest_file: manifest_file.into(),
            current: RwLock::new(Arc::new(MergedDescriptor::default())),
        }
    }

    /// Load and merge the manifests of `roots`, in order.
    pub async fn load(&self, roots: &[Url]) -> DescriptorLoad {
        let roots: Vec<Url> = roots.iter().map(normalize_root).collect();
        let mut merged = MergedDescriptor {
            configured_roots: roots.clone(),
            ..Default::default()
        };
        let mut failures = Vec::new();

        for root in &roots {
            match self.manifest(root).await {
                Ok(manifest) => merged.merge(root, manifest),
                Err(failure) => {
                    tracing::warn!(root = %failure.root, reason = %failure.reason, "failed to load plugin manifest");
                    failures.push(failure);
                }
            }
        }

        if failures.is_empty()
            && let Err(e) = self.remember(&merged).await
        {
            tracing::warn!(error = %e, "failed to cache merged descriptor");
        }

        tracing::debug!(
            roots = roots.len(),
            events = merged.events.len(),
            plugins = merged.roots.len(),
            failed = failures.len(),
            "plugin descriptors merged"
        );

        let descriptor = Arc::new(merged);
        *self.current.write().await = Arc::clone(&descriptor);
        DescriptorLoad {
            descriptor,
            failures,
        }
    }

    pub async fn current(&self) -> Arc<MergedDescriptor> {
        Arc::clone(&*self.current.read().await)
    }

    /// Merged descriptor stored by the last fully successful load
    pub async fn cached(&self) -> Option<MergedDescriptor> {
        match self.cache.get_json(CACHED_DESCRIPTOR_ID).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unreadable cached descriptor");
                None
            }
        }
    }

    /// Roots of the current merge, else of the cached one
    pub async fn configured_roots(&self) -> Vec<Url> {
        let current = self.current().await;
        if !current.configured_roots.is_empty() {
            return current.configured_roots.clone();
        }
        self.cached()
            .await
            .map(|d| d.configured_roots)
            .unwrap_or_default()
    }

    /// Drop cached manifests and the merged descriptor
    pub async fn forget(&self) -> CacheResult<()> {
        self.cache.clear_prefix(MANIFEST_PREFIX).await?;
        self.cache.clear(Some(CACHED_DESCRIPTOR_ID)).await?;
        self.cache.clear(Some(CACHED_ROOTS_ID)).await?;
        *self.current.write().await = Arc::new(MergedDescriptor::default());
        Ok(())
    }

    async fn manifest(&self, root: &Url) -> Result<Manifest, DescriptorFetchError> {
        let key = format!("{MANIFEST_PREFIX}{root}");
        match self.cache.get_json::<Manifest>(&key).await {
            Ok(Some(manifest)) => {
                tracing::trace!(root = %root, "using cached manifest");
                return Ok(manifest);
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(root = %root, error = %e, "ignoring unreadable cached manifest"),
        }

        let failure = |reason: String| DescriptorFetchError {
            root: root.clone(),
            reason,
        };

        let url = root
            .join(&self.manifest_file)
            .map_err(|e| failure(e.to_string()))?;
        let value = self
            .fetcher
            .fetch_json(&url)
            .await
            .map_err(|e| failure(e.to_string()))?;
        let manifest: Manifest =
            serde_json::from_value(value).map_err(|e| failure(format!("invalid manifest: {e}")))?;

        if let Err(e) = self.cache.set_json(&key, &manifest).await {
            tracing::warn!(root = %root, error = %e, "failed to cache manifest");
        }
        Ok(manifest)
    }

    async fn remember(&self, merged: &MergedDescriptor) -> CacheResult<()> {
        self.cache.set_json(CACHED_DESCRIPTOR_ID, merged).await?;
        self.cache.set_json(CACHED_ROOTS_ID, &merged.roots).await
    }
}

impl std::fmt::Debug for DescriptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorRegistry")
            .field("manifest_file", &self.manifest_file)
            .finish()
    }
}
