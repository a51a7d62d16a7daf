//! Plugin trait and capability types.

use async_trait::async_trait;
use serde_json::Value;

use super::{PluginContext, PluginError};

/// What a plugin layer can do.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Handles fired events through `run`
    Run,
    /// Receives `send_message` deliveries
    Message,
    /// Produces a custom failure message
    Failure,
    /// A named member reachable through `call`
    Member(String),
}

impl Capability {
    pub fn member(name: impl Into<String>) -> Self {
        Self::Member(name.into())
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Run => write!(f, "run"),
            Capability::Message => write!(f, "onMessage"),
            Capability::Failure => write!(f, "onFailure"),
            Capability::Member(name) => write!(f, "{}", name),
        }
    }
}

/// Behavior supplied by a plugin.
///
/// A plugin declares which capabilities it provides; the runtime only calls
/// methods for declared capabilities. When plugins are composed through
/// extension, the first layer declaring a capability provides it.
///
/// ```rust
/// use async_trait::async_trait;
/// use plugin_runtime::plugin::{Capability, Plugin, PluginContext, PluginError};
/// use serde_json::{Value, json};
///
/// struct Lookup;
///
/// #[async_trait]
/// impl Plugin for Lookup {
///     fn capabilities(&self) -> Vec<Capability> {
///         vec![Capability::Run]
///     }
///
///     async fn run(
///         &self,
///         _ctx: &PluginContext,
///         params: Value,
///         _configuration: &Value,
///         _event: Option<&str>,
///     ) -> Result<Value, PluginError> {
///         Ok(json!({ "word": params, "definition": "..." }))
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync {
    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Run]
    }

    async fn run(
        &self,
        _ctx: &PluginContext,
        _params: Value,
        _configuration: &Value,
        _event: Option<&str>,
    ) -> Result<Value, PluginError> {
        Err(PluginError::unsupported(Capability::Run))
    }

    async fn on_message(
        &self,
        _ctx: &PluginContext,
        _message: &Value,
        _from: &str,
    ) -> Result<Option<Value>, PluginError> {
        Err(PluginError::unsupported(Capability::Message))
    }

    /// Message for the failure payload when `run` fails
    fn on_failure(&self, _code: &str, _params: &Value, _event: Option<&str>) -> Option<Value> {
        None
    }

    async fn call(
        &self,
        ctx: &PluginContext,
        name: &str,
        _params: Value,
    ) -> Result<Value, PluginError> {
        Err(PluginError::UnknownMember {
            plugin: ctx.plugin_id().to_string(),
            name: name.to_string(),
        })
    }
}
