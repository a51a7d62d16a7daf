//! Descriptor-driven plugin loading.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::{Value, json};
use tracing::Instrument;

use super::{CONFIGURATION_LOAD_EVENT, Runtime};
use crate::Error;
use crate::descriptor::LoadMode;
use crate::observability::load_span;

/// Load progress of one plugin id. Concurrent loaders of the same id share
/// the in-flight future.
pub(crate) enum LoadState {
    Loading(Shared<BoxFuture<'static, bool>>),
    Loaded,
}

tokio::task_local! {
    /// Ids whose loads enclose the current task's work
    static LOAD_CHAIN: Arc<BTreeSet<String>>;
}

impl Runtime {
    /// Load every plugin the descriptor binds to `event` with `mode`
    pub(crate) async fn load_plugins(&self, event: &str, mode: LoadMode) {
        let merged = self.inner.descriptors.current().await;
        let Some(bound) = merged.plugins_for(event) else {
            return;
        };

        for (id, entry) in bound {
            if entry.load != mode {
                continue;
            }
            if self.inner.registry.read().await.contains(id) {
                continue;
            }
            self.load_plugin(id).await;
        }
    }

    /// Fetch and register a described plugin, at most once per id.
    ///
    /// Resolves to `false` when the code could not be loaded; the id may be
    /// retried later. A loaded plugin is never fetched again, even after
    /// it has been removed. Events fired while a load is in progress skip
    /// that id instead of waiting for it.
    pub fn load_plugin(&self, id: &str) -> BoxFuture<'static, bool> {
        let runtime = self.clone();
        let id = id.to_string();

        async move {
            let chain = LOAD_CHAIN.try_with(Arc::clone).unwrap_or_default();
            if chain.contains(&id) {
                tracing::trace!(plugin_id = %id, "load already in progress further up");
                return false;
            }

            let pending = match runtime.inner.loads.entry(id.clone()) {
                Entry::Occupied(entry) => match entry.get() {
                    LoadState::Loaded => return true,
                    LoadState::Loading(pending) => pending.clone(),
                },
                Entry::Vacant(entry) => {
                    let mut nested = chain.as_ref().clone();
                    nested.insert(id.clone());
                    let pending = LOAD_CHAIN
                        .scope(
                            Arc::new(nested),
                            runtime.clone().fetch_and_register(id.clone()),
                        )
                        .instrument(load_span(&id))
                        .boxed()
                        .shared();
                    entry.insert(LoadState::Loading(pending.clone()));
                    pending
                }
            };

            let awaited = pending.clone();
            let loaded = pending.await;
            let ours = |state: &LoadState| {
                matches!(state, LoadState::Loading(current) if current.ptr_eq(&awaited))
            };
            if loaded {
                if let Some(mut state) = runtime.inner.loads.get_mut(&id)
                    && ours(&*state)
                {
                    *state = LoadState::Loaded;
                }
            } else {
                runtime.inner.loads.remove_if(&id, |_, state| ours(state));
            }
            loaded
        }
        .boxed()
    }

    async fn fetch_and_register(self, id: String) -> bool {
        let metrics = &self.inner.metrics;
        let merged = self.inner.descriptors.current().await;
        let (Some(descriptor), Some(root)) = (merged.descriptor(&id), merged.root_of(&id).cloned())
        else {
            tracing::warn!(plugin_id = %id, "plugin is not described by any root");
            metrics.load_failures.inc();
            return false;
        };

        let configuration = self.configuration(&descriptor).await;
        self.transform(
            &format!("{CONFIGURATION_LOAD_EVENT}-after"),
            json!({ "pluginId": id, "configuration": configuration }),
        )
        .await;

        let specs = match descriptor.code_url(&root) {
            Ok(url) => self
                .inner
                .loader
                .load_code(&url, &descriptor)
                .await
                .map_err(Error::from),
            Err(e) => Err(e),
        };
        let specs = match specs {
            Ok(specs) => specs,
            Err(e) => {
                tracing::warn!(plugin_id = %id, error = %e, "failed to load plugin code");
                metrics.load_failures.inc();
                return false;
            }
        };

        let mut registered = true;
        let mut claimed = false;
        for mut spec in specs {
            if spec.id.is_none() && !claimed {
                spec.id = Some(id.clone());
            }
            if spec.id.as_deref() == Some(id.as_str()) {
                claimed = true;
            }
            if spec.root.is_none() {
                spec.root = Some(root.to_string());
            }

            let spec_id = spec.id.clone();
            if let Err(e) = self.add(spec, Value::Null).await {
                tracing::warn!(plugin_id = %id, spec_id = ?spec_id, error = %e, "failed to register loaded plugin");
                if spec_id.as_deref() == Some(id.as_str()) {
                    registered = false;
                }
            }
        }

        if registered {
            metrics.plugins_loaded.inc();
            tracing::debug!(plugin_id = %id, "plugin loaded");
        } else {
            metrics.load_failures.inc();
        }
        registered
    }
}
