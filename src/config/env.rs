//! Environment Variable Overrides
//!
//! Reads `PLUGIN_RUNTIME_*` variables on top of a loaded configuration.
//! Environment variables are treated as read-only at runtime.

use std::path::PathBuf;

use super::{ConfigError, ConfigResult, RuntimeConfig};

pub const ENV_PREFIX: &str = "PLUGIN_RUNTIME_";

#[derive(Debug, Clone)]
pub struct EnvOverrides {
    prefix: String,
}

impl EnvOverrides {
    pub fn new() -> Self {
        Self::prefixed(ENV_PREFIX)
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// `cache.tier` -> `PLUGIN_RUNTIME_CACHE_TIER`
    fn env_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase().replace('.', "_"))
    }

    pub fn apply(&self, config: RuntimeConfig) -> ConfigResult<RuntimeConfig> {
        self.apply_with(config, |name| match std::env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Env(e)),
        })
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_with<F>(&self, mut config: RuntimeConfig, lookup: F) -> ConfigResult<RuntimeConfig>
    where
        F: Fn(&str) -> ConfigResult<Option<String>>,
    {
        if let Some(value) = lookup(&self.env_key("cache.tier"))? {
            config.cache_tier = value.parse().map_err(|message| ConfigError::InvalidValue {
                key: self.env_key("cache.tier"),
                message,
            })?;
        }
        if let Some(value) = lookup(&self.env_key("cache.path"))? {
            config.cache_path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(&self.env_key("manifest.file"))? {
            config.manifest_file = value;
        }
        if let Some(value) = lookup(&self.env_key("duplicate.policy"))? {
            config.duplicate_policy =
                value.parse().map_err(|message| ConfigError::InvalidValue {
                    key: self.env_key("duplicate.policy"),
                    message,
                })?;
        }
        if let Some(value) = lookup(&self.env_key("failure.code"))? {
            config.failure_code = value;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for EnvOverrides {
    fn default() -> Self {
        Self::new()
    }
}
