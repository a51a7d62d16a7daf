use serde_json::Value;

use super::PluginError;
use crate::descriptor::resource_path;
use crate::runtime::Runtime;

/// Runtime services handed to a plugin while it executes.
#[derive(Clone)]
pub struct PluginContext {
    runtime: Runtime,
    plugin_id: String,
    root: String,
    package_name: String,
}

impl PluginContext {
    pub(crate) fn new(
        runtime: Runtime,
        plugin_id: impl Into<String>,
        root: impl Into<String>,
        package_name: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            plugin_id: plugin_id.into(),
            root: root.into(),
            package_name: package_name.into(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// `<root>/<package>/resources/`
    pub fn resource_path(&self) -> String {
        resource_path(&self.root, &self.package_name)
    }

    /// Remove this plugin from the runtime
    pub async fn remove(&self) -> bool {
        self.runtime.remove(&self.plugin_id).await
    }

    /// Invoke a member of this plugin through its composed layers, so
    /// members overridden by an extension take effect.
    pub async fn call(&self, name: &str, params: Value) -> Result<Value, PluginError> {
        Ok(self.runtime.call(&self.plugin_id, name, params).await?)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id)
            .field("root", &self.root)
            .finish()
    }
}
