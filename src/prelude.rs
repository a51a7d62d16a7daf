//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust
//! use plugin_runtime::prelude::*;
//! ```

// Core types
pub use crate::Error;
pub use crate::Result;
pub use crate::{Registration, Runtime, RuntimeBuilder};

// Plugins
pub use crate::plugin::{Capability, FnPlugin, Plugin, PluginContext, PluginError, PluginSpec};

// Dispatch
pub use crate::runtime::{Callback, Dispatch, ExecutionFailure, Outcome, callback};

// Loading
pub use crate::descriptor::{LoadMode, PluginDescriptor};
pub use crate::fetch::{CodeLoader, ModuleCatalog, ResourceFetcher};

// Configuration
pub use crate::cache::CacheTier;
pub use crate::config::{DuplicatePolicy, RuntimeConfig};
