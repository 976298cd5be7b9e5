//! Transaction history reconstructed from vault events.
//!
//! A scan covers the last `lookback_blocks` blocks of every registered vault,
//! in chunks of `chunk_size` blocks, and keeps the newest `max_records`
//! records. Transactions older than the window are not shown.
//!
//! Each account moves through [`LoadState`]:
//!
//! ```text
//!   Idle ──load_history──▶ Loading ──ok──▶ Loaded ──refresh──▶ Loading
//!                             │
//!                             └──err──▶ Failed ──load_history──▶ Loading
//! ```
//!
//! `load_history` on a `Loading` or `Loaded` account returns the cached view
//! without scanning. [`ActivityIndexer::end_session`] resets the account to
//! `Idle`, so reconnecting later scans again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::Address;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::accounting::{accounting_for, VaultAccounting, VaultActivity};
use crate::cache::{HistoryCache, TransactionRecord};
use crate::chain::{BlockRange, VaultChain};
use crate::config::HistoryConfig;
use crate::error::{Result, VaultError};
use crate::registry::VaultRegistry;
use crate::session::AccountKey;

/// History load progress of one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed(String),
}

pub struct ActivityIndexer {
    chain: Arc<dyn VaultChain>,
    vaults: Vec<Arc<dyn VaultAccounting>>,
    cache: Arc<HistoryCache>,
    config: HistoryConfig,
    states: Mutex<HashMap<AccountKey, LoadState>>,
}

impl ActivityIndexer {
    pub fn new(
        chain: Arc<dyn VaultChain>,
        registry: &VaultRegistry,
        cache: Arc<HistoryCache>,
        config: HistoryConfig,
    ) -> Self {
        Self {
            chain,
            vaults: registry.all().iter().cloned().map(accounting_for).collect(),
            cache,
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub async fn state(&self, account: &AccountKey) -> LoadState {
        self.states
            .lock()
            .await
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    /// Cached history of `account`, possibly stale, empty on a miss.
    pub async fn cached(&self, account: &AccountKey) -> Vec<TransactionRecord> {
        self.cache.load(account).await.unwrap_or_default()
    }

    /// Scans the history of `account` once per session.
    ///
    /// Returns the cached view unchanged when a load is already running or
    /// has completed.
    pub async fn load_history(&self, account: &AccountKey) -> Vec<TransactionRecord> {
        if !self.begin(account, false).await {
            debug!(%account, "history already loading or loaded");
            return self.cached(account).await;
        }
        self.run(account).await
    }

    /// Re-scans an account whose history is already loaded. A no-op while a
    /// scan is running.
    pub async fn refresh(&self, account: &AccountKey) -> Vec<TransactionRecord> {
        if !self.begin(account, true).await {
            debug!(%account, "history scan already running");
            return self.cached(account).await;
        }
        self.run(account).await
    }

    /// Forgets the load state and in-memory history of `account`. The
    /// persisted cache is kept.
    pub async fn end_session(&self, account: &AccountKey) {
        self.states.lock().await.remove(account);
        self.cache.invalidate(account).await;
    }

    async fn begin(&self, account: &AccountKey, force: bool) -> bool {
        let mut states = self.states.lock().await;
        let state = states.entry(*account).or_default();
        let proceed = match state {
            LoadState::Loading => false,
            LoadState::Loaded => force,
            LoadState::Idle | LoadState::Failed(_) => true,
        };
        if proceed {
            *state = LoadState::Loading;
        }
        proceed
    }

    async fn finish(&self, account: &AccountKey, state: LoadState) {
        self.states.lock().await.insert(*account, state);
    }

    async fn run(&self, account: &AccountKey) -> Vec<TransactionRecord> {
        match self.scan(account).await {
            Ok(records) => {
                if let Err(e) = self.cache.save(account, records.clone()).await {
                    warn!(%account, error = %e, "failed to persist history");
                }
                self.finish(account, LoadState::Loaded).await;
                records
            }
            Err(e) => {
                warn!(%account, error = %e, "history scan failed, keeping cached history");
                self.finish(account, LoadState::Failed(e.to_string())).await;
                self.cached(account).await
            }
        }
    }

    #[instrument(skip(self), fields(account = %account))]
    async fn scan(&self, account: &AccountKey) -> Result<Vec<TransactionRecord>> {
        let head = self.chain.block_number().await?;
        let range = BlockRange::lookback(head, self.config.lookback_blocks);
        let owner = account.address();

        let scans = self
            .vaults
            .iter()
            .map(|vault| self.scan_vault(vault.as_ref(), owner, range));
        let results = join_all(scans).await;

        let failed = results.iter().filter(|r| r.is_none()).count();
        if !self.vaults.is_empty() && failed == self.vaults.len() {
            return Err(VaultError::Rpc("every vault scan failed".to_string()));
        }

        let matched: Vec<(String, VaultActivity)> = results.into_iter().flatten().flatten().collect();
        let mut timestamps = HashMap::new();
        let mut records = Vec::with_capacity(matched.len());
        for (symbol, activity) in matched {
            let Some(timestamp) = self.resolve_timestamp(&mut timestamps, activity.block_number).await
            else {
                debug!(tx_hash = %activity.tx_hash, block = activity.block_number, "skipping event with unknown block");
                continue;
            };
            records.push(TransactionRecord {
                kind: activity.kind,
                amount: activity.amount,
                symbol,
                tx_hash: activity.tx_hash,
                timestamp,
            });
        }

        let merged = merge_history(records, self.config.max_records);
        info!(from = range.from, to = range.to, records = merged.len(), "history scanned");
        Ok(merged)
    }

    /// Activity of one vault over the window, `None` if any chunk failed.
    async fn scan_vault(
        &self,
        vault: &dyn VaultAccounting,
        owner: Address,
        range: BlockRange,
    ) -> Option<Vec<(String, VaultActivity)>> {
        let symbol = &vault.descriptor().symbol;
        let mut matched = Vec::new();
        for chunk in range.chunks(self.config.chunk_size) {
            match vault.activity(self.chain.as_ref(), owner, chunk).await {
                Ok(found) => matched.extend(found.into_iter().map(|a| (symbol.clone(), a))),
                Err(e) => {
                    warn!(%symbol, from = chunk.from, to = chunk.to, error = %e, "vault scan failed");
                    return None;
                }
            }
        }
        Some(matched)
    }

    async fn resolve_timestamp(&self, memo: &mut HashMap<u64, Option<u64>>, block: u64) -> Option<u64> {
        if let Some(known) = memo.get(&block) {
            return *known;
        }
        let timestamp = match self.chain.block_timestamp(block).await {
            Ok(timestamp) => timestamp,
            Err(e) => {
                warn!(block, error = %e, "block lookup failed");
                None
            }
        };
        memo.insert(block, timestamp);
        timestamp
    }
}

/// Sorts newest first, keeps the first record of each transaction and caps
/// the result at `max` records.
pub fn merge_history(mut records: Vec<TransactionRecord>, max: usize) -> Vec<TransactionRecord> {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let mut seen = HashSet::new();
    records.retain(|record| seen.insert(record.tx_hash));
    records.truncate(max);
    records
}
