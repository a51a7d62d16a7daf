//! Event fan-out and staged plugin execution.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::{EXECUTION_FAILURE_EVENT, Runtime};
use crate::cache::CONFIGURATION_PREFIX;
use crate::descriptor::{LoadMode, PluginDescriptor};
use crate::observability::{execution_span, fire_span};
use crate::plugin::{Capability, PluginError};
use crate::registry::RuntimePlugin;

/// Receives each plugin's result, each failure payload, or the unchanged
/// params when nothing is bound to the event.
pub type Callback = Arc<dyn Fn(Value) + Send + Sync>;

pub fn callback<F>(f: F) -> Callback
where
    F: Fn(Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureData {
    pub plugin_id: String,
}

/// Payload describing a failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub success: bool,
    pub message: Value,
    pub data: FailureData,
}

impl ExecutionFailure {
    pub fn new(plugin_id: impl Into<String>, message: Value) -> Self {
        Self {
            success: false,
            message,
            data: FailureData {
                plugin_id: plugin_id.into(),
            },
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.data.plugin_id
    }

    /// `{ "success": false, "message": ..., "data": { "pluginId": ... } }`
    pub fn to_value(&self) -> Value {
        json!({
            "success": self.success,
            "message": self.message,
            "data": { "pluginId": self.data.plugin_id },
        })
    }

    /// Parse a payload received on `plugin-execution-failure`
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Result of one staged execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded { plugin_id: String, value: Value },
    Failed(ExecutionFailure),
}

impl Outcome {
    pub fn plugin_id(&self) -> &str {
        match self {
            Outcome::Succeeded { plugin_id, .. } => plugin_id,
            Outcome::Failed(failure) => failure.plugin_id(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Succeeded { value, .. } => Some(value),
            Outcome::Failed(_) => None,
        }
    }
}

/// Executions spawned by one `fire()`. Dropping it detaches them.
#[derive(Debug, Default)]
pub struct Dispatch {
    handles: Vec<JoinHandle<Outcome>>,
}

impl Dispatch {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every spawned execution, in snapshot order
    pub async fn settled(self) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::warn!(error = %e, "plugin execution task did not complete"),
            }
        }
        outcomes
    }
}

enum Stage {
    Init { params: Value },
    BeforeFired { params: Value },
    Running { params: Value },
    Succeeded { params: Value, value: Value },
    Failed { params: Value, error: PluginError },
    AfterFired { outcome: Outcome },
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Init { .. } => "init",
            Stage::BeforeFired { .. } => "before_fired",
            Stage::Running { .. } => "running",
            Stage::Succeeded { .. } => "succeeded",
            Stage::Failed { .. } => "failed",
            Stage::AfterFired { .. } => "after_fired",
        }
    }
}

impl Runtime {
    /// Dispatch `params` to every plugin bound to `event`.
    ///
    /// Lazily loads the event's plugins, snapshots the bindings and spawns
    /// one staged execution per plugin. With nothing bound, `callback`
    /// receives `params` unchanged.
    pub fn fire(
        &self,
        event: impl Into<String>,
        params: Value,
        callback: Option<Callback>,
    ) -> BoxFuture<'static, Dispatch> {
        let runtime = self.clone();
        let event = event.into();
        let span = fire_span(&event);

        async move {
            runtime.inner.metrics.events_fired.inc();
            runtime.load_plugins(&event, LoadMode::Lazy).await;

            let snapshot = runtime.inner.registry.read().await.snapshot(&event);
            if snapshot.is_empty() {
                tracing::trace!(event = %event, "no plugins bound");
                if let Some(callback) = callback {
                    callback(params);
                }
                return Dispatch::default();
            }

            let handles = snapshot
                .into_iter()
                .map(|plugin| {
                    tokio::spawn(runtime.execute(
                        plugin,
                        params.clone(),
                        Some(event.clone()),
                        callback.clone(),
                    ))
                })
                .collect();

            Dispatch { handles }
        }
        .instrument(span)
        .boxed()
    }

    /// Thread `params` through every plugin bound to `event`, in order.
    /// A failing plugin leaves the value unchanged.
    pub(crate) async fn transform(&self, event: &str, params: Value) -> Value {
        self.load_plugins(event, LoadMode::Lazy).await;

        let snapshot = self.inner.registry.read().await.snapshot(event);
        let mut params = params;
        for plugin in snapshot {
            match self
                .execute(plugin, params.clone(), Some(event.to_string()), None)
                .await
            {
                Outcome::Succeeded { value, .. } => params = value,
                Outcome::Failed(failure) => {
                    tracing::debug!(event, plugin_id = failure.plugin_id(), "hook failed, params unchanged");
                }
            }
        }
        params
    }

    /// Fire without waiting for anything
    pub(crate) fn signal(&self, event: String, params: Value) {
        tokio::spawn(self.fire(event, params, None));
    }

    pub(crate) fn execute(
        &self,
        plugin: Arc<RuntimePlugin>,
        params: Value,
        event: Option<String>,
        callback: Option<Callback>,
    ) -> BoxFuture<'static, Outcome> {
        let runtime = self.clone();
        let span = execution_span(plugin.id(), event.as_deref());

        async move {
            let id = plugin.id().to_string();
            let metrics = &runtime.inner.metrics;
            metrics.executions.inc();
            metrics.executions_in_flight.inc();

            let mut stage = Stage::Init { params };
            let outcome = loop {
                tracing::trace!(stage = stage.name(), "execution stage");
                stage = match stage {
                    Stage::Init { params } => {
                        let params = runtime.transform(&format!("{id}-before"), params).await;
                        Stage::BeforeFired { params }
                    }
                    Stage::BeforeFired { params } => {
                        runtime.signal(format!("{id}-in-process"), params.clone());
                        Stage::Running { params }
                    }
                    Stage::Running { params } => {
                        match runtime
                            .run_plugin(&plugin, params.clone(), event.as_deref())
                            .await
                        {
                            Ok(value) => Stage::Succeeded { params, value },
                            Err(error) => Stage::Failed { params, error },
                        }
                    }
                    Stage::Succeeded { params, value } => {
                        if let Some(callback) = &callback {
                            callback(value.clone());
                        }
                        runtime
                            .fire(format!("{id}-after"), params, None)
                            .await
                            .settled()
                            .await;
                        Stage::AfterFired {
                            outcome: Outcome::Succeeded {
                                plugin_id: id.clone(),
                                value,
                            },
                        }
                    }
                    Stage::Failed { params, error } => {
                        let failure = runtime
                            .fail(&plugin, &error, &params, event.as_deref())
                            .await;
                        let payload = failure.to_value();
                        if let Some(callback) = &callback {
                            callback(payload.clone());
                        }
                        runtime
                            .fire(EXECUTION_FAILURE_EVENT, payload, None)
                            .await
                            .settled()
                            .await;
                        runtime
                            .fire(format!("{id}-after"), params, None)
                            .await
                            .settled()
                            .await;
                        Stage::AfterFired {
                            outcome: Outcome::Failed(failure),
                        }
                    }
                    Stage::AfterFired { outcome } => break outcome,
                };
            };

            metrics.executions_in_flight.dec();
            outcome
        }
        .instrument(span)
        .boxed()
    }

    async fn run_plugin(
        &self,
        plugin: &Arc<RuntimePlugin>,
        params: Value,
        event: Option<&str>,
    ) -> Result<Value, PluginError> {
        let layer = plugin
            .provider(&Capability::Run)
            .cloned()
            .ok_or_else(|| PluginError::unsupported(Capability::Run))?;
        let configuration = self.configuration(plugin.descriptor()).await;
        let ctx = self.context(plugin);

        match AssertUnwindSafe(layer.run(&ctx, params, &configuration, event))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(PluginError::from_panic(payload.as_ref())),
        }
    }

    /// Build the failure payload and drop the plugin
    async fn fail(
        &self,
        plugin: &Arc<RuntimePlugin>,
        error: &PluginError,
        params: &Value,
        event: Option<&str>,
    ) -> ExecutionFailure {
        let id = plugin.id();
        self.inner.metrics.executions_failed.inc();
        tracing::warn!(plugin_id = id, event = event.unwrap_or(""), error = %error, "plugin execution failed");

        let code = &self.inner.config.failure_code;
        let message = plugin
            .provider(&Capability::Failure)
            .and_then(|layer| {
                std::panic::catch_unwind(AssertUnwindSafe(|| layer.on_failure(code, params, event)))
                    .unwrap_or_else(|_| {
                        tracing::warn!(plugin_id = id, "failure handler panicked");
                        None
                    })
            })
            .unwrap_or_else(|| Value::String(code.clone()));

        // A failed plugin receives no further events, its own removal hooks included
        self.inner.registry.write().await.unbind(id);
        self.remove(id).await;
        ExecutionFailure::new(id, message)
    }

    /// Cached configuration for a plugin, fetched once from its root
    pub(crate) async fn configuration(&self, descriptor: &PluginDescriptor) -> Value {
        let key = format!("{CONFIGURATION_PREFIX}{}", descriptor.id);
        if let Ok(Some(cached)) = self.inner.cache.get_json::<Value>(&key).await
            && cached.is_object()
        {
            return cached;
        }

        let merged = self.inner.descriptors.current().await;
        let Some(root) = merged.root_of(&descriptor.id) else {
            return Value::Object(Map::new());
        };

        let configuration = match descriptor.configuration_url(root) {
            Ok(url) => match self.inner.fetcher.fetch_json(&url).await {
                Ok(value) if value.is_object() => value,
                Ok(_) => {
                    tracing::debug!(plugin_id = %descriptor.id, url = %url, "configuration is not an object");
                    Value::Object(Map::new())
                }
                Err(e) => {
                    tracing::debug!(plugin_id = %descriptor.id, error = %e, "no configuration");
                    Value::Object(Map::new())
                }
            },
            Err(e) => {
                tracing::debug!(plugin_id = %descriptor.id, error = %e, "no configuration location");
                Value::Object(Map::new())
            }
        };

        if let Err(e) = self.inner.cache.set(&key, configuration.clone()).await {
            tracing::warn!(plugin_id = %descriptor.id, error = %e, "failed to cache configuration");
        }
        configuration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_payload_shape() {
        let failure = ExecutionFailure::new("dictionary.lookup", json!("plugin_execution_failure"));
        assert_eq!(
            failure.to_value(),
            json!({
                "success": false,
                "message": "plugin_execution_failure",
                "data": {"pluginId": "dictionary.lookup"}
            })
        );
        assert_eq!(ExecutionFailure::from_value(&failure.to_value()), Some(failure));
    }

    #[test]
    fn test_failure_from_unrelated_value() {
        assert!(ExecutionFailure::from_value(&json!({"word": "x"})).is_none());
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = Outcome::Succeeded {
            plugin_id: "a.b".into(),
            value: json!(1),
        };
        assert!(ok.is_success());
        assert_eq!(ok.plugin_id(), "a.b");
        assert_eq!(ok.value(), Some(&json!(1)));

        let failed = Outcome::Failed(ExecutionFailure::new("a.c", json!("x")));
        assert!(!failed.is_success());
        assert_eq!(failed.plugin_id(), "a.c");
        assert!(failed.value().is_none());
    }

    #[tokio::test]
    async fn test_empty_dispatch_settles() {
        assert!(Dispatch::default().settled().await.is_empty());
    }
}
