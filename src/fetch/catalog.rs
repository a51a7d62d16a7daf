//! Compiled-in plugin modules.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use url::Url;

use super::FetchError;
use crate::descriptor::PluginDescriptor;
use crate::plugin::PluginSpec;

/// Produces the plugins registered by one code location.
#[async_trait::async_trait]
pub trait CodeLoader: Send + Sync {
    async fn load_code(
        &self,
        url: &Url,
        descriptor: &PluginDescriptor,
    ) -> Result<Vec<PluginSpec>, FetchError>;
}

pub type ModuleFactory = Arc<dyn Fn(&PluginDescriptor) -> Vec<PluginSpec> + Send + Sync>;

/// Maps plugin ids to factories linked into the host binary.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    modules: Arc<RwLock<BTreeMap<String, ModuleFactory>>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, plugin_id: impl Into<String>, factory: F)
    where
        F: Fn(&PluginDescriptor) -> Vec<PluginSpec> + Send + Sync + 'static,
    {
        let mut modules = self
            .modules
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        modules.insert(plugin_id.into(), Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register)
    pub fn module<F>(self, plugin_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginDescriptor) -> Vec<PluginSpec> + Send + Sync + 'static,
    {
        self.register(plugin_id, factory);
        self
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.factory(plugin_id).is_some()
    }

    pub fn ids(&self) -> Vec<String> {
        self.modules
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn factory(&self, plugin_id: &str) -> Option<ModuleFactory> {
        self.modules
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(plugin_id)
            .cloned()
    }
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("modules", &self.ids())
            .finish()
    }
}

#[async_trait::async_trait]
impl CodeLoader for ModuleCatalog {
    async fn load_code(
        &self,
        url: &Url,
        descriptor: &PluginDescriptor,
    ) -> Result<Vec<PluginSpec>, FetchError> {
        let factory = self
            .factory(&descriptor.id)
            .ok_or_else(|| FetchError::ModuleNotFound {
                plugin_id: descriptor.id.clone(),
                url: url.to_string(),
            })?;

        tracing::debug!(plugin_id = %descriptor.id, url = %url, "instantiating plugin module");
        Ok(factory(descriptor))
    }
}
