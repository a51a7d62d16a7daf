//! Closure-backed plugins.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Capability, Plugin, PluginContext, PluginError};

type RunFn = Arc<dyn Fn(Value, &Value, Option<&str>) -> Result<Value, PluginError> + Send + Sync>;
type MessageFn = Arc<dyn Fn(&Value, &str) -> Result<Option<Value>, PluginError> + Send + Sync>;
type FailureFn = Arc<dyn Fn(&str, &Value, Option<&str>) -> Option<Value> + Send + Sync>;
type MemberFn = Arc<dyn Fn(Value) -> Result<Value, PluginError> + Send + Sync>;

/// Plugin assembled from closures. Capabilities follow from which closures
/// are set.
///
/// ```rust
/// use plugin_runtime::plugin::FnPlugin;
/// use serde_json::json;
///
/// let plugin = FnPlugin::new()
///     .on_run(|params, _config, _event| Ok(json!({ "echo": params })))
///     .member("version", |_| Ok(json!("1.0")));
/// ```
#[derive(Clone, Default)]
pub struct FnPlugin {
    run: Option<RunFn>,
    on_message: Option<MessageFn>,
    on_failure: Option<FailureFn>,
    members: BTreeMap<String, MemberFn>,
}

impl FnPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_run<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, &Value, Option<&str>) -> Result<Value, PluginError> + Send + Sync + 'static,
    {
        self.run = Some(Arc::new(f));
        self
    }

    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &str) -> Result<Option<Value>, PluginError> + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Value, Option<&str>) -> Option<Value> + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(f));
        self
    }

    pub fn member<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, PluginError> + Send + Sync + 'static,
    {
        self.members.insert(name.into(), Arc::new(f));
        self
    }
}

impl std::fmt::Debug for FnPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPlugin")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

#[async_trait]
impl Plugin for FnPlugin {
    fn capabilities(&self) -> Vec<Capability> {
        let mut capabilities = Vec::new();
        if self.run.is_some() {
            capabilities.push(Capability::Run);
        }
        if self.on_message.is_some() {
            capabilities.push(Capability::Message);
        }
        if self.on_failure.is_some() {
            capabilities.push(Capability::Failure);
        }
        capabilities.extend(self.members.keys().cloned().map(Capability::Member));
        capabilities
    }

    async fn run(
        &self,
        _ctx: &PluginContext,
        params: Value,
        configuration: &Value,
        event: Option<&str>,
    ) -> Result<Value, PluginError> {
        match &self.run {
            Some(run) => run(params, configuration, event),
            None => Err(PluginError::unsupported(Capability::Run)),
        }
    }

    async fn on_message(
        &self,
        _ctx: &PluginContext,
        message: &Value,
        from: &str,
    ) -> Result<Option<Value>, PluginError> {
        match &self.on_message {
            Some(handler) => handler(message, from),
            None => Err(PluginError::unsupported(Capability::Message)),
        }
    }

    fn on_failure(&self, code: &str, params: &Value, event: Option<&str>) -> Option<Value> {
        self.on_failure
            .as_ref()
            .and_then(|handler| handler(code, params, event))
    }

    async fn call(
        &self,
        ctx: &PluginContext,
        name: &str,
        params: Value,
    ) -> Result<Value, PluginError> {
        match self.members.get(name) {
            Some(member) => member(params),
            None => Err(PluginError::UnknownMember {
                plugin: ctx.plugin_id().to_string(),
                name: name.to_string(),
            }),
        }
    }
}
