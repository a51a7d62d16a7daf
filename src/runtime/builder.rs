//! Runtime construction.

use std::sync::Arc;

use super::{Runtime, RuntimeInner};
use crate::cache::{CacheStore, CacheTier, DurableTier, FileTier, MemoryTier};
use crate::config::RuntimeConfig;
use crate::descriptor::DescriptorRegistry;
use crate::fetch::{CodeLoader, DefaultFetcher, ModuleCatalog, ResourceFetcher};

#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    fetcher: Option<Arc<dyn ResourceFetcher>>,
    loader: Option<Arc<dyn CodeLoader>>,
    cache: Option<Arc<CacheStore>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fetcher(mut self, fetcher: impl ResourceFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn shared_fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn code_loader(mut self, loader: impl CodeLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Shorthand for a [`ModuleCatalog`] code loader
    pub fn modules(self, catalog: ModuleCatalog) -> Self {
        self.code_loader(catalog)
    }

    /// Use an existing cache instead of building one from the config
    pub fn cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> crate::Result<Runtime> {
        self.config.validate()?;
        Ok(self.assemble())
    }

    pub(super) fn assemble(self) -> Runtime {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(default_cache(&self.config)));
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(DefaultFetcher::new()));
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(ModuleCatalog::new()));
        let descriptors = DescriptorRegistry::new(
            Arc::clone(&fetcher),
            Arc::clone(&cache),
            self.config.manifest_file.clone(),
        );

        Runtime {
            inner: Arc::new(RuntimeInner {
                config: self.config,
                cache,
                descriptors,
                fetcher,
                loader,
                registry: Default::default(),
                loads: Default::default(),
                anonymous: Default::default(),
                metrics: Default::default(),
            }),
        }
    }
}

fn default_cache(config: &RuntimeConfig) -> CacheStore {
    let persistent: Arc<dyn DurableTier> = match config.cache_tier {
        CacheTier::Persistent => match config.resolved_cache_path() {
            Some(path) => Arc::new(FileTier::new(path)),
            None => {
                tracing::warn!("no cache directory available, persistent tier kept in memory");
                Arc::new(MemoryTier::named("persistent"))
            }
        },
        _ => Arc::new(MemoryTier::named("persistent")),
    };
    CacheStore::with_tiers(Arc::new(MemoryTier::named("session")), persistent)
}
