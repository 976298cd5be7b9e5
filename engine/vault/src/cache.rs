//! Persisted transaction history.
//!
//! History is stored per account under the key `"<prefix>-<account>"` as
//! JSON, in the layout the browser dashboard used for local storage:
//!
//! ```json
//! { "history": [ { "type": "Deposit", "amount": "2.5", "symbol": "MNT",
//!                  "txHash": "0x…", "timestamp": 1718000000 } ],
//!   "updatedAt": 1718000000000 }
//! ```
//!
//! [`HistoryCache`] layers an in-memory view over a [`HistoryStore`]. The
//! memory layer is dropped with [`HistoryCache::invalidate`] on account
//! switch; the persisted layer survives across sessions.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use alloy::primitives::TxHash;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::accounting::TxKind;
use crate::error::{Result, VaultError};
use crate::session::AccountKey;

/// One deposit or withdrawal of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    #[serde(rename = "type")]
    pub kind: TxKind,
    /// Asset amount in human units.
    pub amount: Decimal,
    pub symbol: String,
    /// Natural key of the record.
    pub tx_hash: TxHash,
    /// Seconds since epoch of the containing block.
    pub timestamp: u64,
}

impl TransactionRecord {
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.timestamp).ok()?, 0)
    }

    /// Block explorer link, `base` ending with `/tx/`.
    pub fn explorer_url(&self, base: &str) -> String {
        format!("{base}{}", self.tx_hash)
    }
}

/// Stored payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedHistory {
    #[serde(default)]
    pub history: Vec<TransactionRecord>,
    /// Milliseconds since epoch of the last write.
    #[serde(default)]
    pub updated_at: i64,
}

// ============================================================================
// STORES
// ============================================================================

/// Raw key-value persistence for cached history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn write(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    dir: PathBuf,
}

impl FileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn io_error(err: std::io::Error) -> VaultError {
    VaultError::Cache(err.to_string())
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    /// Writes through a temporary file so readers never see a partial entry.
    async fn write(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(io_error)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await.map_err(io_error)?;
        fs::rename(&tmp, &path).await.map_err(io_error)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| VaultError::Cache("memory store poisoned".to_string()))
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

/// Typed access to cached history, keyed by account.
pub struct HistoryCache {
    store: Arc<dyn HistoryStore>,
    prefix: String,
    memory: RwLock<HashMap<AccountKey, Vec<TransactionRecord>>>,
}

impl HistoryCache {
    pub fn new(store: Arc<dyn HistoryStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            memory: RwLock::new(HashMap::new()),
        }
    }

    /// Storage key of `account`.
    pub fn key(&self, account: &AccountKey) -> String {
        format!("{}-{}", self.prefix, account)
    }

    /// Cached history of `account`, memory first, then the persisted layer.
    ///
    /// Unreadable or corrupted entries are reported as a miss.
    pub async fn load(&self, account: &AccountKey) -> Option<Vec<TransactionRecord>> {
        if let Some(history) = self.memory.read().await.get(account) {
            return Some(history.clone());
        }

        let key = self.key(account);
        let raw = match self.store.read(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(%key, error = %e, "history cache unreadable");
                return None;
            }
        };

        match serde_json::from_str::<CachedHistory>(&raw) {
            Ok(cached) => {
                debug!(%key, records = cached.history.len(), updated_at = cached.updated_at, "history cache hit");
                self.memory
                    .write()
                    .await
                    .insert(*account, cached.history.clone());
                Some(cached.history)
            }
            Err(e) => {
                warn!(%key, error = %e, "discarding corrupted history cache");
                None
            }
        }
    }

    /// Replaces both layers with `history`.
    pub async fn save(&self, account: &AccountKey, history: Vec<TransactionRecord>) -> Result<()> {
        let payload = CachedHistory {
            history,
            updated_at: Utc::now().timestamp_millis(),
        };
        let json = serde_json::to_string(&payload).map_err(|e| VaultError::Cache(e.to_string()))?;
        self.memory.write().await.insert(*account, payload.history);
        self.store.write(&self.key(account), &json).await
    }

    /// Drops the in-memory view of `account`.
    pub async fn invalidate(&self, account: &AccountKey) {
        self.memory.write().await.remove(account);
    }

    /// Drops both layers of `account`.
    pub async fn purge(&self, account: &AccountKey) -> Result<()> {
        self.invalidate(account).await;
        self.store.remove(&self.key(account)).await
    }
}
