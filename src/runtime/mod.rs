//! The plugin runtime: lifecycle, registration and the event pipeline.
//!
//! A [`Runtime`] is a cheap handle; clones share one registry, cache and
//! descriptor state. Plugins receive it through their
//! [`PluginContext`](crate::plugin::PluginContext).

mod builder;
mod loading;
mod messaging;
mod pipeline;

pub use builder::RuntimeBuilder;
pub use pipeline::{Callback, Dispatch, ExecutionFailure, FailureData, Outcome, callback};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use url::Url;

use crate::cache::{CONFIGURATION_PREFIX, CacheStore};
use crate::config::RuntimeConfig;
use crate::descriptor::{DescriptorRegistry, LoadMode, PluginDescriptor};
use crate::fetch::{CodeLoader, ResourceFetcher};
use crate::observability::RuntimeMetrics;
use crate::plugin::{Capability, PluginContext, PluginError, PluginSpec};
use crate::registry::{Admission, PluginRegistry, RuntimePlugin};
use crate::{Error, Result};

use loading::LoadState;

pub const RUNTIME_INIT_AFTER_EVENT: &str = "runtime-init-after";
pub const PLUGIN_ADD_EVENT: &str = "plugin-add";
pub const PLUGIN_REMOVE_EVENT: &str = "plugin-remove";
pub const CONFIGURATION_LOAD_EVENT: &str = "plugin-configuration-load";
pub const EXECUTION_FAILURE_EVENT: &str = "plugin-execution-failure";

pub const ANONYMOUS_PREFIX: &str = "anonymous-";
pub const DEFAULT_ROOT: &str = "./";

/// What `add()` did with a plugin.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Bound { id: String, events: Vec<String> },
    /// Folded into the listed extenders
    Superseded { id: String, by: Vec<String> },
    /// Had no events: executed once and discarded
    RanOnce { id: String, outcome: Outcome },
}

impl Registration {
    pub fn id(&self) -> &str {
        match self {
            Registration::Bound { id, .. }
            | Registration::Superseded { id, .. }
            | Registration::RanOnce { id, .. } => id,
        }
    }
}

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    cache: Arc<CacheStore>,
    descriptors: DescriptorRegistry,
    fetcher: Arc<dyn ResourceFetcher>,
    loader: Arc<dyn CodeLoader>,
    registry: RwLock<PluginRegistry>,
    loads: DashMap<String, LoadState>,
    anonymous: AtomicU64,
    metrics: RuntimeMetrics,
}

impl Runtime {
    /// Runtime with default configuration, fetcher and an empty module catalog
    pub fn new() -> Self {
        RuntimeBuilder::new().assemble()
    }

    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Select the cache tier, load descriptors from `roots`, load eager
    /// plugins and fire `runtime-init-after`.
    ///
    /// Roots that fail to load are reported through
    /// [`Error::DescriptorFetch`] after initialization has completed with
    /// the remaining roots.
    pub async fn init(&self, roots: &[Url]) -> Result<()> {
        self.inner.cache.init(self.inner.config.cache_tier).await?;

        let load = self.inner.descriptors.load(roots).await;
        let events: Vec<String> = load
            .descriptor
            .event_names()
            .map(str::to_string)
            .collect();
        for event in &events {
            self.load_plugins(event, LoadMode::Eager).await;
        }

        self.fire(RUNTIME_INIT_AFTER_EVENT, Value::Null, None)
            .await
            .settled()
            .await;

        tracing::info!(
            roots = roots.len(),
            events = events.len(),
            plugins = self.plugin_count().await,
            failed_roots = load.failures.len(),
            "runtime initialized"
        );

        if load.is_complete() {
            Ok(())
        } else {
            Err(Error::DescriptorFetch {
                failures: load.failures,
            })
        }
    }

    /// Flush the cache and drop every plugin. Cached data is kept.
    pub async fn stop(&self) -> Result<()> {
        self.inner.cache.flush().await?;
        self.inner.registry.write().await.clear();
        self.inner.loads.clear();
        tracing::info!("runtime stopped");
        Ok(())
    }

    /// Stop, forget cached configurations and descriptors, then initialize
    /// again from the previously configured roots.
    pub async fn reset(&self) -> Result<()> {
        let roots = self.inner.descriptors.configured_roots().await;
        self.stop().await?;
        self.inner.cache.clear_prefix(CONFIGURATION_PREFIX).await?;
        self.inner.descriptors.forget().await?;
        self.init(&roots).await
    }

    /// Register a plugin.
    ///
    /// Extensions are resolved in both directions during admission. A plugin
    /// without events is executed once with `params` and removed again.
    pub async fn add(&self, spec: PluginSpec, params: Value) -> Result<Registration> {
        let PluginSpec {
            id,
            events,
            extends,
            root,
            plugin,
        } = spec;

        let id = id.unwrap_or_else(|| {
            let n = self.inner.anonymous.fetch_add(1, Ordering::Relaxed) + 1;
            format!("{ANONYMOUS_PREFIX}{n}")
        });

        let merged = self.inner.descriptors.current().await;
        let root = root
            .or_else(|| merged.root_of(&id).map(Url::to_string))
            .unwrap_or_else(|| DEFAULT_ROOT.to_string());

        let mut descriptor = PluginDescriptor::for_plugin(&id, events, extends);
        if let Some(known) = merged.descriptor(&id) {
            descriptor.package_name = known.package_name;
            descriptor.relative_path = known.relative_path;
            descriptor.load_mode = known.load_mode;
        }

        let (admission, admitted) = {
            let mut registry = self.inner.registry.write().await;
            let admission = registry.admit(
                RuntimePlugin::new(descriptor, root, plugin),
                self.inner.config.duplicate_policy,
            )?;
            (admission, registry.get(&id))
        };

        self.fire(
            format!("{PLUGIN_ADD_EVENT}-after"),
            json!({ "pluginId": id, "parameters": params }),
            None,
        )
        .await
        .settled()
        .await;

        let registration = match admission {
            Admission::Bound { events } => {
                tracing::info!(plugin_id = %id, events = ?events, "plugin registered");
                Registration::Bound { id, events }
            }
            Admission::Superseded { by } => {
                tracing::info!(plugin_id = %id, by = ?by, "plugin superseded by extension");
                Registration::Superseded { id, by }
            }
            Admission::RunOnce => {
                let outcome = match admitted {
                    Some(plugin) => self.execute(plugin, params, None, None).await,
                    None => Outcome::Failed(ExecutionFailure::new(
                        &id,
                        Value::String(self.inner.config.failure_code.clone()),
                    )),
                };
                self.remove(&id).await;
                tracing::debug!(plugin_id = %id, success = outcome.is_success(), "run-once plugin finished");
                Registration::RanOnce { id, outcome }
            }
        };

        Ok(registration)
    }

    /// Unregister `id`, firing the `plugin-remove-*` events around the
    /// mutation. Returns `false`, without firing anything, for unknown ids.
    pub async fn remove(&self, id: &str) -> bool {
        if !self.inner.registry.read().await.contains(id) {
            return false;
        }

        let notice = self
            .transform(&format!("{PLUGIN_REMOVE_EVENT}-before"), json!({ "pluginId": id }))
            .await;
        self.signal(format!("{PLUGIN_REMOVE_EVENT}-in-process"), notice.clone());

        let removed = self.inner.registry.write().await.remove(id).is_some();
        if removed {
            tracing::info!(plugin_id = id, "plugin removed");
        }

        self.fire(format!("{PLUGIN_REMOVE_EVENT}-after"), notice, None)
            .await
            .settled()
            .await;
        removed
    }

    /// Invoke a named member of a registered plugin, resolved through its
    /// extension layers.
    pub async fn call(&self, id: &str, name: &str, params: Value) -> Result<Value> {
        let plugin = self
            .plugin(id)
            .await
            .ok_or_else(|| Error::PluginNotFound { id: id.to_string() })?;

        let layer = plugin
            .provider(&Capability::member(name))
            .cloned()
            .ok_or_else(|| PluginError::UnknownMember {
                plugin: id.to_string(),
                name: name.to_string(),
            })?;

        let ctx = self.context(&plugin);
        Ok(layer.call(&ctx, name, params).await?)
    }

    pub async fn plugin(&self, id: &str) -> Option<Arc<RuntimePlugin>> {
        self.inner.registry.read().await.get(id)
    }

    pub async fn is_registered(&self, id: &str) -> bool {
        self.inner.registry.read().await.contains(id)
    }

    /// Ids bound to `event`, in dispatch order
    pub async fn bound_plugins(&self, event: &str) -> Vec<String> {
        self.inner.registry.read().await.bound(event)
    }

    /// Extenders still waiting for `target`
    pub async fn pending_extenders(&self, target: &str) -> Vec<String> {
        self.inner.registry.read().await.pending().waiters(target).to_vec()
    }

    pub async fn plugin_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    pub fn descriptors(&self) -> &DescriptorRegistry {
        &self.inner.descriptors
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.inner.metrics
    }

    fn context(&self, plugin: &RuntimePlugin) -> PluginContext {
        PluginContext::new(
            self.clone(),
            plugin.id(),
            plugin.root(),
            plugin.descriptor().package_name.clone(),
        )
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("loads", &self.inner.loads.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::plugin::FnPlugin;

    fn echo() -> FnPlugin {
        FnPlugin::new().on_run(|params, _config, _event| Ok(params))
    }

    fn collector() -> (Callback, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (
            callback(move |value| sink.lock().unwrap().push(value)),
            seen,
        )
    }

    #[tokio::test]
    async fn test_fire_without_plugins_returns_params() {
        let runtime = Runtime::new();
        let (cb, seen) = collector();

        let dispatch = runtime.fire("nothing-bound", json!({"x": 1}), Some(cb)).await;

        assert!(dispatch.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![json!({"x": 1})]);
    }

    #[tokio::test]
    async fn test_anonymous_ids_are_sequential() {
        let runtime = Runtime::new();
        let first = runtime
            .add(PluginSpec::new(echo()).event("e"), Value::Null)
            .await
            .unwrap();
        let second = runtime
            .add(PluginSpec::new(echo()).event("e"), Value::Null)
            .await
            .unwrap();

        assert_eq!(first.id(), "anonymous-1");
        assert_eq!(second.id(), "anonymous-2");
        assert_eq!(
            runtime.bound_plugins("e").await,
            vec!["anonymous-1", "anonymous-2"]
        );
    }

    #[tokio::test]
    async fn test_default_root() {
        let runtime = Runtime::new();
        runtime
            .add(PluginSpec::new(echo()).id("pkg.a").event("e"), Value::Null)
            .await
            .unwrap();

        let plugin = runtime.plugin("pkg.a").await.unwrap();
        assert_eq!(plugin.root(), DEFAULT_ROOT);
        assert_eq!(plugin.resource_path(), "./pkg/resources/");
    }

    #[tokio::test]
    async fn test_run_once_plugin_is_discarded() {
        let runtime = Runtime::new();
        let registration = runtime
            .add(PluginSpec::new(echo()).id("pkg.once"), json!("hello"))
            .await
            .unwrap();

        match registration {
            Registration::RanOnce { id, outcome } => {
                assert_eq!(id, "pkg.once");
                assert_eq!(outcome.value(), Some(&json!("hello")));
            }
            other => panic!("unexpected registration: {other:?}"),
        }
        assert!(!runtime.is_registered("pkg.once").await);
    }

    #[tokio::test]
    async fn test_remove_unknown_id() {
        let runtime = Runtime::new();
        let (cb, seen) = collector();
        runtime
            .add(
                PluginSpec::new(FnPlugin::new().on_run({
                    let cb = cb.clone();
                    move |params, _config, _event| {
                        cb(params.clone());
                        Ok(params)
                    }
                }))
                .id("watch.remove")
                .event("plugin-remove-after"),
                Value::Null,
            )
            .await
            .unwrap();

        assert!(!runtime.remove("pkg.missing").await);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_reject_policy() {
        let runtime = Runtime::builder()
            .config(RuntimeConfig::new().duplicate_policy(DuplicatePolicy::Reject))
            .build()
            .unwrap();
        runtime
            .add(PluginSpec::new(echo()).id("pkg.a").event("e"), Value::Null)
            .await
            .unwrap();

        let err = runtime
            .add(PluginSpec::new(echo()).id("pkg.a").event("e"), Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId { .. }));
        assert_eq!(runtime.bound_plugins("e").await, vec!["pkg.a"]);
    }

    #[tokio::test]
    async fn test_call_errors() {
        let runtime = Runtime::new();
        runtime
            .add(PluginSpec::new(echo()).id("pkg.a").event("e"), Value::Null)
            .await
            .unwrap();

        assert!(matches!(
            runtime.call("pkg.missing", "lookup", Value::Null).await,
            Err(Error::PluginNotFound { .. })
        ));
        assert!(matches!(
            runtime.call("pkg.a", "lookup", Value::Null).await,
            Err(Error::Plugin(PluginError::UnknownMember { .. }))
        ));
    }

    #[tokio::test]
    async fn test_stop_clears_plugins() {
        let runtime = Runtime::new();
        runtime
            .add(PluginSpec::new(echo()).id("pkg.a").event("e"), Value::Null)
            .await
            .unwrap();

        runtime.stop().await.unwrap();

        assert_eq!(runtime.plugin_count().await, 0);
        assert!(runtime.bound_plugins("e").await.is_empty());
    }
}
