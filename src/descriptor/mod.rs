//! Plugin descriptors and the manifests they are discovered from.
//!
//! Every root serves a `plugins.json` manifest mapping event names to the
//! plugins bound to them:
//!
//! ```json
//! {
//!   "word-selected": {
//!     "dictionary.lookup": { "package": "dictionary", "pluginPath": "lookup", "load": "lazy" }
//!   }
//! }
//! ```
//!
//! Manifests from several roots are merged into one [`MergedDescriptor`].

mod registry;

pub use registry::{DescriptorFetchError, DescriptorLoad, DescriptorRegistry};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Loaded during `init()`
    Eager,
    /// Loaded on the first `fire()` of a bound event
    #[default]
    Lazy,
}

/// One plugin binding inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub package: String,
    pub plugin_path: String,
    #[serde(default)]
    pub load: LoadMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
}

/// Event name -> plugin id -> entry
pub type Manifest = BTreeMap<String, BTreeMap<String, ManifestEntry>>;

/// Static metadata about one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub id: String,
    pub package_name: String,
    pub relative_path: String,
    #[serde(default)]
    pub event_names: Vec<String>,
    #[serde(default)]
    pub load_mode: LoadMode,
    #[serde(default)]
    pub extends: Vec<String>,
}

impl PluginDescriptor {
    /// Descriptor derived from a dotted id alone
    pub fn from_id(id: &str) -> Result<Self> {
        let (package_name, relative_path) = coordinates(id)?;
        Ok(Self {
            id: id.to_string(),
            package_name,
            relative_path,
            event_names: Vec::new(),
            load_mode: LoadMode::default(),
            extends: Vec::new(),
        })
    }

    /// Descriptor for a plugin added directly. Ids without a package
    /// (anonymous plugins) use the whole id as the package name.
    pub fn for_plugin(id: &str, event_names: Vec<String>, extends: Vec<String>) -> Self {
        let (package_name, relative_path) =
            coordinates(id).unwrap_or_else(|_| (id.to_string(), String::new()));
        Self {
            id: id.to_string(),
            package_name,
            relative_path,
            event_names,
            load_mode: LoadMode::default(),
            extends,
        }
    }

    pub fn is_run_once(&self) -> bool {
        self.event_names.is_empty()
    }

    /// `<root><package>/client/<path>`
    pub fn code_url(&self, root: &Url) -> Result<Url> {
        join(
            root,
            &format!("{}/client/{}", self.package_name, self.relative_path),
        )
    }

    /// `<root><package>/configuration.json`
    pub fn configuration_url(&self, root: &Url) -> Result<Url> {
        join(root, &format!("{}/configuration.json", self.package_name))
    }

    /// `<root>/<package>/resources/`
    pub fn resource_path(&self, root: &str) -> String {
        resource_path(root, &self.package_name)
    }
}

/// Split `pkg.a.b` into (`pkg`, `a/b`).
pub fn coordinates(id: &str) -> Result<(String, String)> {
    let invalid = |reason: &str| Error::InvalidPluginId {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let (package, rest) = id
        .split_once('.')
        .ok_or_else(|| invalid("expected '<package>.<path>'"))?;
    if package.is_empty() {
        return Err(invalid("empty package name"));
    }
    if rest.split('.').any(str::is_empty) {
        return Err(invalid("empty path segment"));
    }

    Ok((package.to_string(), rest.replace('.', "/")))
}

pub fn resource_path(root: &str, package: &str) -> String {
    if root.ends_with('/') {
        format!("{root}{package}/resources/")
    } else {
        format!("{root}/{package}/resources/")
    }
}

/// Roots are directories; make sure relative joins land inside them.
pub fn normalize_root(root: &Url) -> Url {
    let mut root = root.clone();
    if !root.path().ends_with('/') {
        let path = format!("{}/", root.path());
        root.set_path(&path);
    }
    root
}

fn join(root: &Url, relative: &str) -> Result<Url> {
    normalize_root(root)
        .join(relative)
        .map_err(|e| Error::Config(format!("invalid plugin location '{relative}': {e}")))
}

/// Union of every root's manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedDescriptor {
    pub events: BTreeMap<String, BTreeMap<String, ManifestEntry>>,
    /// Root of the last manifest that declared each plugin id
    pub roots: BTreeMap<String, Url>,
    #[serde(default)]
    pub configured_roots: Vec<Url>,
}

impl MergedDescriptor {
    /// Merge one root's manifest; same-id entries are overwritten.
    pub fn merge(&mut self, root: &Url, manifest: Manifest) {
        for (event, plugins) in manifest {
            let bound = self.events.entry(event).or_default();
            for (id, entry) in plugins {
                self.roots.insert(id.clone(), root.clone());
                bound.insert(id, entry);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }

    pub fn plugins_for(&self, event: &str) -> Option<&BTreeMap<String, ManifestEntry>> {
        self.events.get(event)
    }

    pub fn root_of(&self, id: &str) -> Option<&Url> {
        self.roots.get(id)
    }

    /// Aggregate every binding of `id` into one descriptor.
    pub fn descriptor(&self, id: &str) -> Option<PluginDescriptor> {
        let mut found: Option<PluginDescriptor> = None;

        for (event, plugins) in &self.events {
            let Some(entry) = plugins.get(id) else {
                continue;
            };
            let descriptor = found.get_or_insert_with(|| PluginDescriptor {
                id: id.to_string(),
                package_name: entry.package.clone(),
                relative_path: entry.plugin_path.clone(),
                event_names: Vec::new(),
                load_mode: entry.load,
                extends: Vec::new(),
            });
            descriptor.event_names.push(event.clone());
            for target in &entry.extends {
                if !descriptor.extends.contains(target) {
                    descriptor.extends.push(target.clone());
                }
            }
        }

        found
    }
}
