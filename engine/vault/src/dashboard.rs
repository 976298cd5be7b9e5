//! One connected account's view of the vaults.
//!
//! [`Dashboard`] wires the reconciler, executor, indexer and yield model
//! together and owns everything that changes with the session: the poller,
//! the history view, faucet balances, the amount field and per-target action
//! status. Every asynchronous result is committed only if the session ticket
//! it was started under is still current.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy::primitives::TxHash;
use alloy::signers::local::PrivateKeySigner;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::accounting::WithdrawAmount;
use crate::cache::{FileHistoryStore, HistoryCache, HistoryStore, TransactionRecord};
use crate::chain::VaultChain;
use crate::config::EngineConfig;
use crate::error::{Result, VaultError};
use crate::executor::{ActionExecutor, ActionStatus, ActionTarget};
use crate::indexer::{ActivityIndexer, LoadState};
use crate::reconciler::{AccountPosition, BalancePoller, BalanceReconciler, PositionBoard};
use crate::registry::VaultGroup;
use crate::rpc::RpcChain;
use crate::session::{AccountKey, SessionGuard, SessionTicket};
use crate::yield_model::{YieldProjection, YieldQuote};

/// Balance and yield of one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub symbol: String,
    pub group: VaultGroup,
    pub deposited: Decimal,
    pub quote: YieldQuote,
    pub projection: YieldProjection,
}

/// A value tagged with the session it belongs to.
type Scoped<T> = Arc<RwLock<Option<(SessionTicket, T)>>>;

async fn read_scoped<T: Clone>(slot: &Scoped<T>, current: Option<SessionTicket>) -> Option<T> {
    let current = current?;
    slot.read()
        .await
        .as_ref()
        .filter(|(ticket, _)| *ticket == current)
        .map(|(_, value)| value.clone())
}

pub struct Dashboard {
    config: EngineConfig,
    guard: Arc<SessionGuard>,
    reconciler: Arc<BalanceReconciler>,
    board: Arc<PositionBoard>,
    executor: ActionExecutor,
    indexer: Arc<ActivityIndexer>,
    poller: Mutex<Option<BalancePoller>>,
    history_task: Mutex<Option<JoinHandle<()>>>,
    history: Scoped<Vec<TransactionRecord>>,
    faucet: Scoped<BTreeMap<String, Decimal>>,
    amount: RwLock<String>,
    statuses: RwLock<HashMap<ActionTarget, ActionStatus>>,
}

impl Dashboard {
    pub fn new(config: EngineConfig, chain: Arc<dyn VaultChain>, store: Arc<dyn HistoryStore>) -> Self {
        let guard = Arc::new(SessionGuard::new());
        let cache = Arc::new(HistoryCache::new(store, config.history.cache_prefix.clone()));
        Self {
            reconciler: Arc::new(BalanceReconciler::new(chain.clone(), config.vaults.clone())),
            board: Arc::new(PositionBoard::new(guard.clone())),
            executor: ActionExecutor::new(
                chain.clone(),
                &config.vaults,
                config.faucet_address,
                config.faucet_tokens.clone(),
            ),
            indexer: Arc::new(ActivityIndexer::new(
                chain,
                &config.vaults,
                cache,
                config.history.clone(),
            )),
            guard,
            poller: Mutex::new(None),
            history_task: Mutex::new(None),
            history: Arc::new(RwLock::new(None)),
            faucet: Arc::new(RwLock::new(None)),
            amount: RwLock::new(String::new()),
            statuses: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Dashboard over JSON-RPC with a file-backed history cache.
    pub fn from_config(config: EngineConfig, signer: PrivateKeySigner) -> Result<Self> {
        let chain = Arc::new(RpcChain::connect(&config.rpc_url, signer)?);
        let store = Arc::new(FileHistoryStore::new(config.history.cache_dir.clone()));
        Ok(Self::new(config, chain, store))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn ticket(&self) -> Result<SessionTicket> {
        self.guard.current().await.ok_or(VaultError::NotConnected)
    }

    pub async fn account(&self) -> Option<AccountKey> {
        self.guard.current().await.map(|ticket| ticket.account)
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Starts a session for `account`, replacing any previous one.
    ///
    /// Cached history is shown immediately; the history scan and balance
    /// polling run in the background.
    #[instrument(skip(self))]
    pub async fn connect(&self, account: &str) -> Result<SessionTicket> {
        let account = AccountKey::parse(account)?;
        self.teardown().await;

        let ticket = self.guard.begin(account).await;
        info!(%account, "session started");

        let cached = self.indexer.cached(&account).await;
        *self.history.write().await = Some((ticket, cached));

        let indexer = self.indexer.clone();
        let guard = self.guard.clone();
        let history = self.history.clone();
        let task = tokio::spawn(async move {
            let records = indexer.load_history(&account).await;
            if guard.is_current(&ticket).await {
                *history.write().await = Some((ticket, records));
            }
        });
        *self.history_task.lock().await = Some(task);

        *self.poller.lock().await = Some(BalancePoller::spawn(
            self.reconciler.clone(),
            self.board.clone(),
            ticket,
            self.config.poll_interval(),
        ));
        Ok(ticket)
    }

    /// Ends the current session and drops everything shown for it.
    pub async fn disconnect(&self) {
        self.teardown().await;
    }

    async fn teardown(&self) {
        let Some(previous) = self.guard.end().await else {
            return;
        };
        if let Some(poller) = self.poller.lock().await.take() {
            poller.stop();
        }
        if let Some(task) = self.history_task.lock().await.take() {
            task.abort();
            // a load past its last await still runs to completion
            let _ = task.await;
        }
        self.indexer.end_session(&previous.account).await;
        self.board.clear().await;
        *self.history.write().await = None;
        *self.faucet.write().await = None;
        self.statuses.write().await.clear();
        self.amount.write().await.clear();
        info!(account = %previous.account, "session ended");
    }

    // ------------------------------------------------------------------
    // Balances
    // ------------------------------------------------------------------

    /// Reconciles now and returns the committed position.
    pub async fn refresh_balances(&self) -> Result<AccountPosition> {
        let ticket = self.ticket().await?;
        self.reconciler.refresh(&self.board, ticket).await;
        self.board.position().await.ok_or(VaultError::NotConnected)
    }

    pub async fn positions(&self) -> Option<AccountPosition> {
        self.board.position().await
    }

    /// Every registered asset with its deposited amount and yield figures.
    pub async fn position_views(&self) -> Vec<PositionView> {
        let position = self.board.position().await;
        self.config
            .vaults
            .all()
            .iter()
            .map(|vault| {
                let deposited = position
                    .as_ref()
                    .map(|p| p.get(&vault.symbol))
                    .unwrap_or(Decimal::ZERO);
                let quote = YieldQuote::new(&vault.symbol, vault.asset_class());
                PositionView {
                    symbol: vault.symbol.clone(),
                    group: vault.group,
                    deposited,
                    projection: quote.project(deposited),
                    quote,
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub async fn history(&self) -> Vec<TransactionRecord> {
        read_scoped(&self.history, self.guard.current().await)
            .await
            .unwrap_or_default()
    }

    pub async fn history_state(&self) -> LoadState {
        match self.account().await {
            Some(account) => self.indexer.state(&account).await,
            None => LoadState::Idle,
        }
    }

    /// Re-scans the history of the current account.
    pub async fn refresh_history(&self) -> Result<Vec<TransactionRecord>> {
        let ticket = self.ticket().await?;
        let records = self.indexer.refresh(&ticket.account).await;
        self.commit_history(ticket, records.clone()).await;
        Ok(records)
    }

    async fn commit_history(&self, ticket: SessionTicket, records: Vec<TransactionRecord>) {
        if self.guard.is_current(&ticket).await {
            *self.history.write().await = Some((ticket, records));
        }
    }

    /// Explorer link of a history entry.
    pub fn explorer_url(&self, record: &TransactionRecord) -> String {
        record.explorer_url(&self.config.explorer_tx_url)
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    pub async fn set_amount(&self, text: &str) {
        *self.amount.write().await = text.to_string();
    }

    pub async fn amount(&self) -> String {
        self.amount.read().await.clone()
    }

    pub async fn status(&self, target: &ActionTarget) -> ActionStatus {
        self.statuses
            .read()
            .await
            .get(target)
            .cloned()
            .unwrap_or_default()
    }

    async fn set_status(&self, ticket: &SessionTicket, target: ActionTarget, status: ActionStatus) {
        if self.guard.is_current(ticket).await {
            self.statuses.write().await.insert(target, status);
        } else {
            debug!(%target, "dropping status of a stale session");
        }
    }

    /// Deposits the amount field into the vault of `symbol`.
    pub async fn deposit(&self, symbol: &str) -> Result<TxHash> {
        let ticket = self.ticket().await?;
        let text = self.amount().await;
        let target = ActionTarget::Vault(symbol.to_string());
        self.guarded_action(ticket, target, "deposit", || {
            self.executor.deposit(&ticket.account, symbol, &text)
        })
        .await
    }

    /// Withdraws the amount field, or the whole reconciled balance when `all`.
    pub async fn withdraw(&self, symbol: &str, all: bool) -> Result<TxHash> {
        let ticket = self.ticket().await?;
        let amount = if all {
            let reconciled = self
                .board
                .position()
                .await
                .map(|p| p.get(symbol))
                .unwrap_or(Decimal::ZERO);
            WithdrawAmount::All { reconciled }
        } else {
            WithdrawAmount::Exact(self.amount().await)
        };
        let target = ActionTarget::Vault(symbol.to_string());
        self.guarded_action(ticket, target, "withdrawal", || {
            self.executor.withdraw(&ticket.account, symbol, amount)
        })
        .await
    }

    /// Runs a vault action, tracks its status and refreshes balances on success.
    async fn guarded_action<F, Fut>(
        &self,
        ticket: SessionTicket,
        target: ActionTarget,
        label: &str,
        action: F,
    ) -> Result<TxHash>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<TxHash>>,
    {
        if self.executor.is_pending(&target) {
            return Err(VaultError::Busy(target.to_string()));
        }
        self.set_status(
            &ticket,
            target.clone(),
            ActionStatus::Pending {
                message: format!("processing {label}"),
            },
        )
        .await;

        match action().await {
            Ok(tx_hash) => {
                self.set_status(
                    &ticket,
                    target,
                    ActionStatus::Succeeded {
                        message: format!("{label} confirmed"),
                        tx_hash,
                    },
                )
                .await;
                if self.guard.is_current(&ticket).await {
                    self.amount.write().await.clear();
                    self.reconciler.refresh(&self.board, ticket).await;
                }
                Ok(tx_hash)
            }
            Err(VaultError::Busy(what)) => Err(VaultError::Busy(what)),
            Err(e) => {
                self.set_status(
                    &ticket,
                    target,
                    ActionStatus::Failed {
                        message: e.to_string(),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    /// Claims test tokens of `symbol` and refreshes that token's balance.
    pub async fn claim_faucet(&self, symbol: &str) -> Result<TxHash> {
        let ticket = self.ticket().await?;
        let target = ActionTarget::Faucet(symbol.to_string());
        if self.executor.is_pending(&target) {
            return Err(VaultError::Busy(target.to_string()));
        }
        self.set_status(
            &ticket,
            target.clone(),
            ActionStatus::Pending {
                message: format!("claiming {symbol}"),
            },
        )
        .await;

        match self.executor.claim_faucet(&ticket.account, symbol).await {
            Ok(claim) => {
                if let Some(balance) = claim.balance {
                    let mut faucet = self.faucet.write().await;
                    if self.guard.is_current(&ticket).await {
                        let entry = faucet.get_or_insert_with(|| (ticket, BTreeMap::new()));
                        if entry.0 == ticket {
                            entry.1.insert(symbol.to_string(), balance);
                        }
                    }
                }
                self.set_status(
                    &ticket,
                    target,
                    ActionStatus::Succeeded {
                        message: format!("{symbol} claimed"),
                        tx_hash: claim.tx_hash,
                    },
                )
                .await;
                Ok(claim.tx_hash)
            }
            Err(VaultError::Busy(what)) => Err(VaultError::Busy(what)),
            Err(e) => {
                self.set_status(&ticket, target, ActionStatus::Failed { message: e.to_string() })
                    .await;
                Err(e)
            }
        }
    }

    /// Reads every faucet token balance of the current account.
    pub async fn refresh_faucet_balances(&self) -> Result<BTreeMap<String, Decimal>> {
        let ticket = self.ticket().await?;
        let balances = self.executor.faucet_balances(&ticket.account).await;
        if self.guard.is_current(&ticket).await {
            *self.faucet.write().await = Some((ticket, balances.clone()));
        }
        Ok(balances)
    }

    pub async fn faucet_balances(&self) -> BTreeMap<String, Decimal> {
        read_scoped(&self.faucet, self.guard.current().await)
            .await
            .unwrap_or_default()
    }
}
