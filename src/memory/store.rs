//! Durable memory storage
//!
//! Directory layout:
//! ```text
//! <base_dir>/
//! ├── channels/
//! │   ├── <channel-key>.json
//! │   └── ...
//! └── groups/
//!     ├── <group-key>.json
//!     └── ...
//! ```
//!
//! Ids made only of `[A-Za-z0-9_-]` are used as file stems directly;
//! anything else is stored as `b64-<urlsafe base64>`. Saves write
//! `<file>.tmp`, sync it, then rename over the target so a reader never
//! observes a partial blob.

use super::turn::ConversationTurn;
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const ENCODED_PREFIX: &str = "b64-";

/// Which collection a memory belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    Channel,
    Group,
}

impl MemoryScope {
    fn dir_name(&self) -> &'static str {
        match self {
            MemoryScope::Channel => "channels",
            MemoryScope::Group => "groups",
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryScope::Channel => write!(f, "channel"),
            MemoryScope::Group => write!(f, "group"),
        }
    }
}

/// On-disk form of one channel or group memory.
///
/// Unknown fields are ignored on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMemory {
    pub scope: MemoryScope,
    pub id: String,
    pub max_turns: usize,
    pub max_bytes: usize,
    pub turns: Vec<ConversationTurn>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedMemory {
    pub fn total_bytes(&self) -> usize {
        self.turns.iter().map(|t| t.text().len()).sum()
    }
}

/// Memory storage trait
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Atomically replace the stored entry for `(scope, id)`.
    async fn save(&self, memory: &PersistedMemory) -> Result<()>;

    /// Load one entry.
    async fn load(&self, scope: MemoryScope, id: &str) -> Result<Option<PersistedMemory>>;

    /// Delete one entry. Missing entries are not an error.
    async fn delete(&self, scope: MemoryScope, id: &str) -> Result<()>;

    /// Load every readable entry of a scope, skipping corrupt ones.
    async fn load_all(&self, scope: MemoryScope) -> Result<Vec<PersistedMemory>>;
}

/// File-based memory store, one JSON file per key.
pub struct JsonFileStore {
    base_dir: PathBuf,
    /// Per-file write locks
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl JsonFileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create the scope directories up front.
    pub async fn create_dirs(&self) -> Result<()> {
        for scope in [MemoryScope::Channel, MemoryScope::Group] {
            fs::create_dir_all(self.base_dir.join(scope.dir_name())).await?;
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, scope: MemoryScope, id: &str) -> PathBuf {
        self.base_dir
            .join(scope.dir_name())
            .join(format!("{}.json", encode_key(id)))
    }

    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    /// Forget a path's lock once nobody else holds it. Clones are only
    /// handed out under the map lock, so the count check cannot race.
    async fn release_lock(&self, path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
    }
}

#[async_trait]
impl MemoryStore for JsonFileStore {
    async fn save(&self, memory: &PersistedMemory) -> Result<()> {
        let path = self.path_for(memory.scope, &memory.id);
        let lock = self.lock_for(&path).await;
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(memory)?;
        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn load(&self, scope: MemoryScope, id: &str) -> Result<Option<PersistedMemory>> {
        let path = self.path_for(scope, id);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, scope: MemoryScope, id: &str) -> Result<()> {
        let path = self.path_for(scope, id);
        let lock = self.lock_for(&path).await;
        let guard = lock.lock().await;

        let removed = match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        drop(guard);
        self.release_lock(&path, lock).await;
        removed
    }

    async fn load_all(&self, scope: MemoryScope) -> Result<Vec<PersistedMemory>> {
        let dir = self.base_dir.join(scope.dir_name());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "failed to read {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = match fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<PersistedMemory>(&data) {
                Ok(item) if item.scope == scope => items.push(item),
                Ok(item) => {
                    tracing::warn!(
                        "Skipping {}: holds {} memory, expected {}",
                        path.display(),
                        item.scope,
                        scope
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", path.display(), e);
                }
            }
        }

        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}

/// Map an id to a filesystem-safe file stem.
pub fn encode_key(id: &str) -> String {
    let plain = !id.is_empty()
        && !id.starts_with(ENCODED_PREFIX)
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain {
        id.to_string()
    } else {
        format!(
            "{}{}",
            ENCODED_PREFIX,
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(id)
        )
    }
}
