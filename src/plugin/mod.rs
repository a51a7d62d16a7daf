//! Plugin contract.
//!
//! Hosts implement [`Plugin`] (or assemble an [`FnPlugin`]) and hand it to the
//! runtime wrapped in a [`PluginSpec`] carrying its id and event bindings.

mod context;
mod error;
mod function;
mod traits;

pub use context::PluginContext;
pub use error::PluginError;
pub use function::FnPlugin;
pub use traits::{Capability, Plugin};

use std::sync::Arc;

use crate::descriptor::PluginDescriptor;

/// A plugin ready to be added to the runtime.
#[derive(Clone)]
pub struct PluginSpec {
    /// Assigned `anonymous-<n>` when absent
    pub id: Option<String>,
    /// No events means the plugin runs once and is discarded
    pub events: Vec<String>,
    pub extends: Vec<String>,
    /// Defaults to the descriptor root, else `./`
    pub root: Option<String>,
    pub plugin: Arc<dyn Plugin>,
}

impl PluginSpec {
    pub fn new(plugin: impl Plugin + 'static) -> Self {
        Self::from_arc(Arc::new(plugin))
    }

    pub fn from_arc(plugin: Arc<dyn Plugin>) -> Self {
        Self {
            id: None,
            events: Vec::new(),
            extends: Vec::new(),
            root: None,
            plugin,
        }
    }

    /// Spec taking its id, events and extends from a descriptor
    pub fn from_descriptor(descriptor: &PluginDescriptor, plugin: impl Plugin + 'static) -> Self {
        Self::new(plugin)
            .id(descriptor.id.clone())
            .events(descriptor.event_names.iter().cloned())
            .extends(descriptor.extends.iter().cloned())
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }

    pub fn events(mut self, events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.events.extend(events.into_iter().map(Into::into));
        self
    }

    pub fn extends(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extends.extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }
}

impl std::fmt::Debug for PluginSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSpec")
            .field("id", &self.id)
            .field("events", &self.events)
            .field("extends", &self.extends)
            .field("root", &self.root)
            .field("capabilities", &self.plugin.capabilities())
            .finish()
    }
}
