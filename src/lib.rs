//! # plugin-runtime
//!
//! Event-driven plugin orchestration for Rust applications.
//!
//! Plugins are discovered from per-root `plugins.json` manifests, loaded
//! lazily (or eagerly at init) when an event they listen to fires, composed
//! through `extends` overrides, and executed through a staged,
//! failure-isolated pipeline with `before`, `in-process` and `after` hooks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plugin_runtime::{FnPlugin, PluginSpec, Runtime, callback};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), plugin_runtime::Error> {
//!     let runtime = Runtime::new();
//!
//!     runtime
//!         .add(
//!             PluginSpec::new(FnPlugin::new().on_run(|params, _config, _event| {
//!                 Ok(json!({ "word": params, "definition": "a greeting" }))
//!             }))
//!             .id("dictionary.lookup")
//!             .event("word-selected"),
//!             json!(null),
//!         )
//!         .await?;
//!
//!     let outcomes = runtime
//!         .fire("word-selected", json!("hello"), Some(callback(|value| println!("{value}"))))
//!         .await
//!         .settled()
//!         .await;
//!     assert_eq!(outcomes.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Descriptor Roots
//!
//! ```rust,no_run
//! use plugin_runtime::{FnPlugin, ModuleCatalog, PluginSpec, Runtime};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), plugin_runtime::Error> {
//!     let modules = ModuleCatalog::new().module("dictionary.lookup", |descriptor| {
//!         vec![PluginSpec::from_descriptor(
//!             descriptor,
//!             FnPlugin::new().on_run(|params, _, _| Ok(params)),
//!         )]
//!     });
//!
//!     let runtime = Runtime::builder().modules(modules).build()?;
//!     runtime
//!         .init(&[Url::parse("https://plugins.example.com/").expect("valid url")])
//!         .await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod cache;
pub mod config;
pub mod descriptor;
pub mod fetch;
pub mod observability;
pub mod plugin;
pub mod prelude;
pub mod registry;
pub mod runtime;

// Re-exports for convenience
pub use cache::{CacheError, CacheStore, CacheTier, DurableTier, FileTier, MemoryTier};
pub use config::{ConfigError, DuplicatePolicy, EnvOverrides, RuntimeConfig};
pub use descriptor::{
    DescriptorFetchError, DescriptorLoad, DescriptorRegistry, LoadMode, ManifestEntry,
    MergedDescriptor, PluginDescriptor,
};
pub use fetch::{CodeLoader, DefaultFetcher, FetchError, ModuleCatalog, ResourceFetcher};
pub use observability::{MetricsSummary, RuntimeMetrics};
pub use plugin::{Capability, FnPlugin, Plugin, PluginContext, PluginError, PluginSpec};
pub use registry::{PluginRegistry, RuntimePlugin};
pub use runtime::{
    Callback, Dispatch, ExecutionFailure, FailureData, Outcome, Registration, Runtime,
    RuntimeBuilder, callback,
};

/// Error type for plugin-runtime operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// One or more descriptor roots could not be loaded.
    #[error("Failed to load descriptors: {}", join_failures(failures))]
    DescriptorFetch {
        failures: Vec<DescriptorFetchError>,
    },

    /// Adding the plugin would close an `extends` cycle.
    #[error("Extension cycle detected: {}", cycle.join(" -> "))]
    ExtensionCycle { plugin: String, cycle: Vec<String> },

    /// Plugin id already registered under the `Reject` policy.
    #[error("Plugin '{id}' is already registered")]
    DuplicateId { id: String },

    #[error("Invalid plugin id '{id}': {reason}")]
    InvalidPluginId { id: String, reason: String },

    #[error("Plugin '{id}' is not registered")]
    PluginNotFound { id: String },

    /// Manifest, configuration or code could not be fetched.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] plugin::PluginError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

fn join_failures(failures: &[DescriptorFetchError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration, ids, manifests or extension graphs
    Configuration,
    /// Network or server errors that may succeed on retry
    Transient,
    /// A plugin failed or misbehaved
    Plugin,
    /// Internal errors (IO, JSON, cache)
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::Env(_)
            | Error::ExtensionCycle { .. }
            | Error::DuplicateId { .. }
            | Error::InvalidPluginId { .. }
            | Error::PluginNotFound { .. } => ErrorCategory::Configuration,

            Error::DescriptorFetch { .. } => ErrorCategory::Transient,
            Error::Fetch(fetch::FetchError::Network { .. }) => ErrorCategory::Transient,
            Error::Fetch(fetch::FetchError::Status { status, .. }) if *status >= 500 => {
                ErrorCategory::Transient
            }
            Error::Fetch(
                fetch::FetchError::UnsupportedScheme { .. }
                | fetch::FetchError::ModuleNotFound { .. },
            ) => ErrorCategory::Configuration,

            Error::Plugin(_) => ErrorCategory::Plugin,

            Error::Fetch(_) | Error::Cache(_) | Error::Json(_) | Error::Io(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Roots that failed to load, when this is a descriptor error
    pub fn failed_roots(&self) -> Vec<&url::Url> {
        match self {
            Error::DescriptorFetch { failures } => failures.iter().map(|f| &f.root).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::InvalidValue { key, message } => {
                Error::Config(format!("Invalid value for {}: {}", key, message))
            }
            config::ConfigError::Serialization(e) => Error::Json(e),
            config::ConfigError::Io(e) => Error::Io(e),
            config::ConfigError::Env(e) => Error::Env(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
