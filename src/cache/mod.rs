//! Two-level cache in front of a durable key-value tier.
//!
//! Structured values (objects and arrays) live in an in-memory shadow and are
//! written behind to the durable tier through one ordered queue. Scalars are
//! written through before `set` returns. Reads consult the shadow first, so a
//! value is always visible to the writer that stored it.
//!
//! ```rust,no_run
//! use plugin_runtime::cache::{CacheStore, CacheTier};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), plugin_runtime::cache::CacheError> {
//! let cache = CacheStore::new();
//! cache.init(CacheTier::Session).await?;
//! cache.set("plugins.roots", json!({"dictionary.lookup": "https://cdn.example/"})).await?;
//! cache.flush().await?;
//! # Ok(())
//! # }
//! ```

mod file;
mod memory;
mod tier;

pub use file::FileTier;
pub use memory::MemoryTier;
pub use tier::{CacheTier, DurableTier};

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, oneshot};

/// Merged descriptor of the last fully successful load.
pub const CACHED_DESCRIPTOR_ID: &str = "plugins.descriptor";
/// Plugin id to root map of the last fully successful load.
pub const CACHED_ROOTS_ID: &str = "plugins.roots";
/// Per-plugin configuration entries are stored under this prefix.
pub const CONFIGURATION_PREFIX: &str = "plugins.configuration.";
/// Per-root manifests are stored under this prefix followed by the root URL.
pub const MANIFEST_PREFIX: &str = "plugins.manifest.";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tier '{tier}' failed: {message}")]
    Tier { tier: String, message: String },

    #[error("Cache writer stopped")]
    WriterClosed,
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

type Ack = oneshot::Sender<CacheResult<()>>;

enum WriteOp {
    Set {
        tier: Arc<dyn DurableTier>,
        key: String,
        raw: String,
        ack: Option<Ack>,
    },
    Remove {
        tier: Arc<dyn DurableTier>,
        key: String,
        ack: Option<Ack>,
    },
    Clear {
        tier: Arc<dyn DurableTier>,
        ack: Option<Ack>,
    },
    Barrier(Ack),
}

struct Active {
    tier: CacheTier,
    backing: Arc<dyn DurableTier>,
    initialized: bool,
}

pub struct CacheStore {
    session: Arc<dyn DurableTier>,
    persistent: Arc<dyn DurableTier>,
    active: RwLock<Active>,
    shadow: DashMap<String, Value>,
    writer: OnceLock<mpsc::UnboundedSender<WriteOp>>,
}

impl CacheStore {
    /// Store with in-memory session and persistent tiers
    pub fn new() -> Self {
        Self::with_tiers(
            Arc::new(MemoryTier::named("session")),
            Arc::new(MemoryTier::named("persistent")),
        )
    }

    pub fn with_tiers(session: Arc<dyn DurableTier>, persistent: Arc<dyn DurableTier>) -> Self {
        Self {
            session,
            persistent,
            active: RwLock::new(Active {
                tier: CacheTier::Transient,
                backing: Arc::new(MemoryTier::named("transient")),
                initialized: false,
            }),
            shadow: DashMap::new(),
            writer: OnceLock::new(),
        }
    }

    /// Select the backing tier and hydrate the shadow from it.
    ///
    /// Re-selecting the tier that is already active is a no-op.
    pub async fn init(&self, tier: CacheTier) -> CacheResult<()> {
        {
            let active = self.active.read().await;
            if active.initialized && active.tier == tier {
                return Ok(());
            }
        }

        self.flush().await?;

        let backing: Arc<dyn DurableTier> = match tier {
            CacheTier::Transient => Arc::new(MemoryTier::named("transient")),
            CacheTier::Session => Arc::clone(&self.session),
            CacheTier::Persistent => Arc::clone(&self.persistent),
        };

        *self.active.write().await = Active {
            tier,
            backing: Arc::clone(&backing),
            initialized: true,
        };

        self.shadow.clear();
        if tier.is_durable() {
            self.hydrate(backing.as_ref()).await?;
        }

        tracing::debug!(tier = %tier, backing = backing.name(), entries = self.shadow.len(), "cache initialized");
        Ok(())
    }

    pub async fn tier(&self) -> CacheTier {
        self.active.read().await.tier
    }

    /// Shadow value if present, else the raw durable string
    pub async fn get(&self, id: &str) -> CacheResult<Option<Value>> {
        if let Some(value) = self.shadow.get(id) {
            return Ok(Some(value.clone()));
        }

        let backing = self.backing().await;
        Ok(backing.get(id).await?.map(Value::String))
    }

    /// Typed read of a structured entry
    pub async fn get_json<T: DeserializeOwned>(&self, id: &str) -> CacheResult<Option<T>> {
        match self.get(id).await? {
            Some(Value::String(raw)) => Ok(Some(serde_json::from_str(&raw)?)),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, id: &str, value: Value) -> CacheResult<()> {
        let backing = self.backing().await;

        if value.is_object() || value.is_array() {
            let raw = serde_json::to_string(&value)?;
            self.shadow.insert(id.to_string(), value);
            return self.enqueue(WriteOp::Set {
                tier: backing,
                key: id.to_string(),
                raw,
                ack: None,
            });
        }

        self.shadow.remove(id);
        let raw = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let (ack, done) = oneshot::channel();
        self.enqueue(WriteOp::Set {
            tier: backing,
            key: id.to_string(),
            raw,
            ack: Some(ack),
        })?;
        done.await.map_err(|_| CacheError::WriterClosed)?
    }

    /// Typed write of a structured entry
    pub async fn set_json<T: Serialize>(&self, id: &str, value: &T) -> CacheResult<()> {
        self.set(id, serde_json::to_value(value)?).await
    }

    /// Remove one entry, or the whole store and its tier when `id` is `None`
    pub async fn clear(&self, id: Option<&str>) -> CacheResult<()> {
        let backing = self.backing().await;
        let (ack, done) = oneshot::channel();

        match id {
            Some(id) => {
                self.shadow.remove(id);
                self.enqueue(WriteOp::Remove {
                    tier: backing,
                    key: id.to_string(),
                    ack: Some(ack),
                })?;
            }
            None => {
                self.shadow.clear();
                self.enqueue(WriteOp::Clear {
                    tier: backing,
                    ack: Some(ack),
                })?;
            }
        }

        done.await.map_err(|_| CacheError::WriterClosed)?
    }

    /// Remove every entry whose id starts with `prefix`
    pub async fn clear_prefix(&self, prefix: &str) -> CacheResult<usize> {
        self.flush().await?;
        let backing = self.backing().await;

        let mut ids: Vec<String> = backing
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        for entry in self.shadow.iter() {
            if entry.key().starts_with(prefix) && !ids.contains(entry.key()) {
                ids.push(entry.key().clone());
            }
        }

        for id in &ids {
            self.clear(Some(id)).await?;
        }
        Ok(ids.len())
    }

    /// Wait until every queued write has reached the tier
    pub async fn flush(&self) -> CacheResult<()> {
        let (ack, done) = oneshot::channel();
        self.enqueue(WriteOp::Barrier(ack))?;
        done.await.map_err(|_| CacheError::WriterClosed)?
    }

    /// Flush, drop the shadow and rebuild it from the tier
    pub async fn reload(&self) -> CacheResult<()> {
        self.flush().await?;
        let backing = self.backing().await;
        self.shadow.clear();
        self.hydrate(backing.as_ref()).await
    }

    pub fn shadow_len(&self) -> usize {
        self.shadow.len()
    }

    async fn backing(&self) -> Arc<dyn DurableTier> {
        Arc::clone(&self.active.read().await.backing)
    }

    async fn hydrate(&self, backing: &dyn DurableTier) -> CacheResult<()> {
        for key in backing.keys().await? {
            let Some(raw) = backing.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) if value.is_object() || value.is_array() => {
                    self.shadow.insert(key, value);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::trace!(key = %key, error = %e, "skipping non-JSON cache entry");
                }
            }
        }
        Ok(())
    }

    fn enqueue(&self, op: WriteOp) -> CacheResult<()> {
        let sender = self.writer.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(write_behind(rx));
            tx
        });
        sender.send(op).map_err(|_| CacheError::WriterClosed)
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("session", &self.session.name())
            .field("persistent", &self.persistent.name())
            .field("shadow_entries", &self.shadow.len())
            .finish()
    }
}

async fn write_behind(mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Set {
                tier,
                key,
                raw,
                ack,
            } => {
                let result = tier.set(&key, &raw).await;
                settle(ack, result, tier.name(), &key);
            }
            WriteOp::Remove { tier, key, ack } => {
                let result = tier.remove(&key).await.map(|_| ());
                settle(ack, result, tier.name(), &key);
            }
            WriteOp::Clear { tier, ack } => {
                let result = tier.clear().await;
                settle(ack, result, tier.name(), "*");
            }
            WriteOp::Barrier(ack) => {
                let _ = ack.send(Ok(()));
            }
        }
    }
}

fn settle(ack: Option<Ack>, result: CacheResult<()>, tier: &str, key: &str) {
    match ack {
        Some(ack) => {
            let _ = ack.send(result);
        }
        None => {
            if let Err(e) = result {
                tracing::warn!(tier = tier, key = key, error = %e, "write-behind failed");
            }
        }
    }
}
