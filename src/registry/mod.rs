//! Registered plugins, their event bindings and pending extensions.
//!
//! [`PluginRegistry`] is plain synchronous state. The runtime keeps it behind
//! one lock and performs every admission as a single critical section, so
//! extension resolution never observes a half-registered plugin.

pub mod extension;

pub use extension::{extend, find_cycle};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DuplicatePolicy;
use crate::descriptor::PluginDescriptor;
use crate::plugin::{Capability, Plugin};
use crate::{Error, Result};

/// A plugin as held by the registry: descriptor, root and the ordered
/// capability layers it resolves members through.
#[derive(Clone)]
pub struct RuntimePlugin {
    descriptor: PluginDescriptor,
    root: String,
    layers: Vec<Arc<dyn Plugin>>,
    dormant: bool,
}

impl RuntimePlugin {
    pub fn new(descriptor: PluginDescriptor, root: impl Into<String>, plugin: Arc<dyn Plugin>) -> Self {
        Self {
            descriptor,
            root: root.into(),
            layers: vec![plugin],
            dormant: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn events(&self) -> &[String] {
        &self.descriptor.event_names
    }

    pub fn extends(&self) -> &[String] {
        &self.descriptor.extends
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn resource_path(&self) -> String {
        self.descriptor.resource_path(&self.root)
    }

    /// Superseded by an extender: registered but bound to no event
    pub fn is_dormant(&self) -> bool {
        self.dormant
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// First layer declaring `capability`
    pub fn provider(&self, capability: &Capability) -> Option<&Arc<dyn Plugin>> {
        self.layers
            .iter()
            .find(|layer| layer.capabilities().contains(capability))
    }

    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.provider(capability).is_some()
    }

    /// Union of every layer's capabilities, in resolution order
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut all: Vec<Capability> = Vec::new();
        for layer in &self.layers {
            for capability in layer.capabilities() {
                if !all.contains(&capability) {
                    all.push(capability);
                }
            }
        }
        all
    }

    fn into_dormant(mut self) -> Self {
        self.dormant = true;
        self
    }
}

impl std::fmt::Debug for RuntimePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimePlugin")
            .field("id", &self.descriptor.id)
            .field("events", &self.descriptor.event_names)
            .field("extends", &self.descriptor.extends)
            .field("root", &self.root)
            .field("layers", &self.layers.len())
            .field("dormant", &self.dormant)
            .finish()
    }
}

/// Event name -> plugin ids, in registration order.
#[derive(Debug, Clone, Default)]
pub struct EventIndex {
    bindings: HashMap<String, Vec<String>>,
}

impl EventIndex {
    pub fn bind(&mut self, event: &str, id: &str) {
        let ids = self.bindings.entry(event.to_string()).or_default();
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }

    /// Remove `id` from every event
    pub fn unbind(&mut self, id: &str) {
        self.bindings.retain(|_, ids| {
            ids.retain(|existing| existing != id);
            !ids.is_empty()
        });
    }

    pub fn bound(&self, event: &str) -> &[String] {
        self.bindings.get(event).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn events_of(&self, id: &str) -> Vec<String> {
        let mut events: Vec<String> = self
            .bindings
            .iter()
            .filter(|(_, ids)| ids.iter().any(|existing| existing == id))
            .map(|(event, _)| event.clone())
            .collect();
        events.sort();
        events
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

/// Target id -> ids of plugins that extend it.
#[derive(Debug, Clone, Default)]
pub struct PendingExtensions {
    waiters: HashMap<String, Vec<String>>,
}

impl PendingExtensions {
    pub fn record(&mut self, target: &str, extender: &str) {
        let waiters = self.waiters.entry(target.to_string()).or_default();
        if !waiters.iter().any(|w| w == extender) {
            waiters.push(extender.to_string());
        }
    }

    pub fn waiters(&self, target: &str) -> &[String] {
        self.waiters.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop `id` as a waiter on every target
    pub fn remove_waiter(&mut self, id: &str) {
        self.waiters.retain(|_, waiters| {
            waiters.retain(|w| w != id);
            !waiters.is_empty()
        });
    }

    /// Drop `id` as a target and as a waiter
    pub fn purge(&mut self, id: &str) {
        self.waiters.remove(id);
        self.remove_waiter(id);
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn clear(&mut self) {
        self.waiters.clear();
    }
}

/// How an admitted plugin ended up in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Bound to its events
    Bound { events: Vec<String> },
    /// Folded into registered extenders and left dormant
    Superseded { by: Vec<String> },
    /// No events: execute once, then remove
    RunOnce,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<RuntimePlugin>>,
    events: EventIndex,
    pending: PendingExtensions,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `plugin`, resolving extensions in both directions.
    ///
    /// Fails before any mutation when the plugin would close an extension
    /// cycle, or when the id is taken under [`DuplicatePolicy::Reject`].
    pub fn admit(&mut self, plugin: RuntimePlugin, policy: DuplicatePolicy) -> Result<Admission> {
        let id = plugin.id().to_string();

        if let Some(cycle) = find_cycle(&id, plugin.extends(), |node| {
            self.plugins
                .get(node)
                .map(|p| p.extends().to_vec())
                .unwrap_or_default()
        }) {
            return Err(Error::ExtensionCycle { plugin: id, cycle });
        }

        if self.plugins.contains_key(&id) {
            match policy {
                DuplicatePolicy::Reject => return Err(Error::DuplicateId { id }),
                DuplicatePolicy::Replace => {
                    tracing::warn!(plugin_id = %id, "replacing already registered plugin");
                    self.events.unbind(&id);
                    self.pending.remove_waiter(&id);
                }
            }
        }

        let mut plugin = plugin;

        for target_id in plugin.extends().to_vec() {
            self.pending.record(&target_id, &id);
            if let Some(target) = self.plugins.get(&target_id).cloned() {
                plugin = extend(&plugin, &target);
                self.events.unbind(&target_id);
                self.plugins.insert(
                    target_id.clone(),
                    Arc::new(target.as_ref().clone().into_dormant()),
                );
                tracing::debug!(plugin_id = %id, target = %target_id, "extended registered plugin");
            }
        }

        let mut superseded_by = Vec::new();
        for waiter_id in self.pending.waiters(&id).to_vec() {
            if waiter_id == id {
                continue;
            }
            if let Some(waiter) = self.plugins.get(&waiter_id).cloned() {
                let composed = extend(&waiter, &plugin);
                self.plugins.insert(waiter_id.clone(), Arc::new(composed));
                superseded_by.push(waiter_id);
            }
        }

        if !superseded_by.is_empty() {
            tracing::debug!(plugin_id = %id, by = ?superseded_by, "plugin superseded by extenders");
            self.plugins.insert(id, Arc::new(plugin.into_dormant()));
            return Ok(Admission::Superseded { by: superseded_by });
        }

        if plugin.events().is_empty() {
            self.plugins.insert(id, Arc::new(plugin));
            return Ok(Admission::RunOnce);
        }

        let events = plugin.events().to_vec();
        for event in &events {
            self.events.bind(event, &id);
        }
        self.plugins.insert(id, Arc::new(plugin));
        Ok(Admission::Bound { events })
    }

    /// Remove `id` from the registry, every event and pending extensions
    pub fn remove(&mut self, id: &str) -> Option<Arc<RuntimePlugin>> {
        self.events.unbind(id);
        self.pending.purge(id);
        self.plugins.remove(id)
    }

    /// Stop dispatching events to `id`, keeping it registered
    pub fn unbind(&mut self, id: &str) {
        self.events.unbind(id);
    }

    pub fn get(&self, id: &str) -> Option<Arc<RuntimePlugin>> {
        self.plugins.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.contains_key(id)
    }

    /// Plugins bound to `event`, resolved now
    pub fn snapshot(&self, event: &str) -> Vec<Arc<RuntimePlugin>> {
        self.events
            .bound(event)
            .iter()
            .filter_map(|id| self.plugins.get(id).cloned())
            .collect()
    }

    pub fn bound(&self, event: &str) -> Vec<String> {
        self.events.bound(event).to_vec()
    }

    pub fn plugins(&self) -> impl Iterator<Item = &Arc<RuntimePlugin>> {
        self.plugins.values()
    }

    pub fn events(&self) -> &EventIndex {
        &self.events
    }

    pub fn pending(&self) -> &PendingExtensions {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn clear(&mut self) {
        self.plugins.clear();
        self.events.clear();
        self.pending.clear();
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.len())
            .field("events", &self.events)
            .field("pending", &self.pending)
            .finish()
    }
}
