//! Runtime configuration.
//!
//! ```rust,no_run
//! use plugin_runtime::config::{DuplicatePolicy, RuntimeConfig};
//! use plugin_runtime::cache::CacheTier;
//!
//! # async fn example() -> Result<(), plugin_runtime::config::ConfigError> {
//! let config = RuntimeConfig::from_file("runtime.json")
//!     .await?
//!     .with_env()?
//!     .cache_tier(CacheTier::Persistent)
//!     .duplicate_policy(DuplicatePolicy::Reject);
//! # Ok(())
//! # }
//! ```

pub mod env;

pub use env::EnvOverrides;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheTier;

pub const DEFAULT_MANIFEST_FILE: &str = "plugins.json";
pub const DEFAULT_FAILURE_CODE: &str = "plugin_execution_failure";

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error
    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// What `add()` does when a plugin id is already registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Purge the old entry's bindings and register the new plugin in its place.
    #[default]
    Replace,
    /// Refuse the second registration.
    Reject,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown duplicate policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Backing tier for the cache store
    pub cache_tier: CacheTier,
    /// File holding the persistent tier; falls back to the platform data dir
    pub cache_path: Option<PathBuf>,
    /// Manifest file fetched from every root
    pub manifest_file: String,
    pub duplicate_policy: DuplicatePolicy,
    /// Message used in failure payloads when a plugin provides none
    pub failure_code: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_tier: CacheTier::default(),
            cache_path: None,
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            duplicate_policy: DuplicatePolicy::default(),
            failure_code: DEFAULT_FAILURE_CODE.to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; missing fields keep their defaults
    pub async fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `PLUGIN_RUNTIME_*` environment variables
    pub fn with_env(self) -> ConfigResult<Self> {
        EnvOverrides::new().apply(self)
    }

    pub fn cache_tier(mut self, tier: CacheTier) -> Self {
        self.cache_tier = tier;
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn manifest_file(mut self, name: impl Into<String>) -> Self {
        self.manifest_file = name.into();
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn failure_code(mut self, code: impl Into<String>) -> Self {
        self.failure_code = code.into();
        self
    }

    /// Configured path, else `<data dir>/plugin-runtime/cache.json`
    pub fn resolved_cache_path(&self) -> Option<PathBuf> {
        self.cache_path.clone().or_else(|| {
            directories::ProjectDirs::from("", "", "plugin-runtime")
                .map(|dirs| dirs.data_dir().join("cache.json"))
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.manifest_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "manifest_file".into(),
                message: "must not be empty".into(),
            });
        }
        if self.manifest_file.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "manifest_file".into(),
                message: "must be relative to the root".into(),
            });
        }
        if self.failure_code.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "failure_code".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }
}
