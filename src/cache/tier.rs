//! Durable Tier Trait

use serde::{Deserialize, Serialize};

use super::CacheResult;

/// Raw string storage backing the cache store.
#[async_trait::async_trait]
pub trait DurableTier: Send + Sync {
    /// Tier name for logging
    fn name(&self) -> &str;

    /// Get a raw stored value
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a raw value
    async fn set(&self, key: &str, value: &str) -> CacheResult<()>;

    /// Delete a stored value
    async fn remove(&self, key: &str) -> CacheResult<bool>;

    /// List every stored key
    async fn keys(&self) -> CacheResult<Vec<String>>;

    /// Delete everything
    async fn clear(&self) -> CacheResult<()>;
}

/// Which backing storage the cache store writes through to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Private in-memory map, discarded on re-initialization.
    #[default]
    Transient,
    /// Shared tier that lives as long as the hosting process.
    Session,
    /// Tier that survives restarts.
    Persistent,
}

impl CacheTier {
    pub fn is_durable(&self) -> bool {
        !matches!(self, Self::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Session => "session",
            Self::Persistent => "persistent",
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CacheTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transient" | "memory" => Ok(Self::Transient),
            "session" => Ok(Self::Session),
            "persistent" | "local" => Ok(Self::Persistent),
            other => Err(format!("unknown cache tier '{other}'")),
        }
    }
}
