//! Deposit, withdraw and faucet actions.
//!
//! At most one action per target (a vault or a faucet token) is in flight at
//! a time. A second submission for a busy target fails with
//! [`VaultError::Busy`]; other targets are unaffected.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Address, TxHash};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::accounting::{accounting_for, VaultAccounting, WithdrawAmount};
use crate::amount;
use crate::chain::VaultChain;
use crate::error::{Result, VaultError};
use crate::registry::{TokenDescriptor, VaultRegistry};
use crate::session::AccountKey;

/// Something an action can be pending on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "symbol", rename_all = "camelCase")]
pub enum ActionTarget {
    Vault(String),
    Faucet(String),
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vault(symbol) => write!(f, "{symbol} vault"),
            Self::Faucet(symbol) => write!(f, "{symbol} faucet"),
        }
    }
}

/// Outcome of the last action on a target, for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ActionStatus {
    #[default]
    Idle,
    Pending { message: String },
    Succeeded { message: String, tx_hash: TxHash },
    Failed { message: String },
}

impl ActionStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Short status line.
    pub fn message(&self) -> &str {
        match self {
            Self::Idle => "",
            Self::Pending { message } | Self::Succeeded { message, .. } | Self::Failed { message } => {
                message
            }
        }
    }
}

/// Result of a successful faucet claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaucetClaim {
    pub tx_hash: TxHash,
    /// Wallet balance of the claimed token after the claim, `None` if the
    /// read failed.
    pub balance: Option<Decimal>,
}

/// Clears its target from the in-flight set when dropped.
struct InFlight<'a> {
    pending: &'a Mutex<HashSet<ActionTarget>>,
    target: ActionTarget,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.target);
    }
}

/// Submits state-changing transactions.
pub struct ActionExecutor {
    chain: Arc<dyn VaultChain>,
    vaults: HashMap<String, Arc<dyn VaultAccounting>>,
    faucet: Address,
    faucet_tokens: Vec<TokenDescriptor>,
    pending: Mutex<HashSet<ActionTarget>>,
}

impl ActionExecutor {
    pub fn new(
        chain: Arc<dyn VaultChain>,
        registry: &VaultRegistry,
        faucet: Address,
        faucet_tokens: Vec<TokenDescriptor>,
    ) -> Self {
        let vaults = registry
            .all()
            .iter()
            .map(|descriptor| (descriptor.symbol.clone(), accounting_for(descriptor.clone())))
            .collect();
        Self {
            chain,
            vaults,
            faucet,
            faucet_tokens,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn faucet_tokens(&self) -> &[TokenDescriptor] {
        &self.faucet_tokens
    }

    pub fn is_pending(&self, target: &ActionTarget) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(target)
    }

    fn vault(&self, symbol: &str) -> Result<&Arc<dyn VaultAccounting>> {
        self.vaults
            .get(symbol)
            .ok_or_else(|| VaultError::UnknownAsset(symbol.to_string()))
    }

    fn token(&self, symbol: &str) -> Result<&TokenDescriptor> {
        self.faucet_tokens
            .iter()
            .find(|t| t.symbol == symbol)
            .ok_or_else(|| VaultError::UnknownAsset(symbol.to_string()))
    }

    /// Transactions are signed by the chain's signer; acting for any other
    /// account is rejected.
    fn check_signer(&self, account: &AccountKey) -> Result<()> {
        if account.address() != self.chain.signer() {
            return Err(VaultError::InvalidAccount(format!(
                "{account} is not the signing account"
            )));
        }
        Ok(())
    }

    fn acquire(&self, target: ActionTarget) -> Result<InFlight<'_>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.insert(target.clone()) {
            return Err(VaultError::Busy(target.to_string()));
        }
        Ok(InFlight {
            pending: &self.pending,
            target,
        })
    }

    /// Deposits `amount` (asset units) into the vault of `symbol`.
    #[instrument(skip(self), fields(account = %account))]
    pub async fn deposit(&self, account: &AccountKey, symbol: &str, amount: &str) -> Result<TxHash> {
        let vault = self.vault(symbol)?;
        amount::parse_amount(amount)?;
        self.check_signer(account)?;

        let _in_flight = self.acquire(ActionTarget::Vault(symbol.to_string()))?;
        let tx_hash = vault.deposit(self.chain.as_ref(), account.address(), amount).await?;
        info!(%symbol, %tx_hash, "deposit confirmed");
        Ok(tx_hash)
    }

    /// Withdraws from the vault of `symbol`.
    #[instrument(skip(self), fields(account = %account))]
    pub async fn withdraw(
        &self,
        account: &AccountKey,
        symbol: &str,
        amount: WithdrawAmount,
    ) -> Result<TxHash> {
        let vault = self.vault(symbol)?;
        if let WithdrawAmount::Exact(text) = &amount {
            amount::parse_amount(text)?;
        }
        self.check_signer(account)?;

        let _in_flight = self.acquire(ActionTarget::Vault(symbol.to_string()))?;
        let tx_hash = vault.withdraw(self.chain.as_ref(), account.address(), amount).await?;
        info!(%symbol, %tx_hash, "withdrawal confirmed");
        Ok(tx_hash)
    }

    /// Requests test tokens of `symbol` from the faucet, then reads that
    /// token's balance.
    #[instrument(skip(self), fields(account = %account))]
    pub async fn claim_faucet(&self, account: &AccountKey, symbol: &str) -> Result<FaucetClaim> {
        let token = self.token(symbol)?;
        self.check_signer(account)?;

        let _in_flight = self.acquire(ActionTarget::Faucet(symbol.to_string()))?;
        let tx_hash = self.chain.request_tokens(self.faucet, token.address).await?;
        info!(%symbol, %tx_hash, "faucet claim confirmed");

        let balance = match self.read_token(token, account.address()).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!(%symbol, error = %e, "balance read after claim failed");
                None
            }
        };
        Ok(FaucetClaim { tx_hash, balance })
    }

    /// Wallet balance of every faucet token, zero for tokens whose read fails.
    pub async fn faucet_balances(&self, account: &AccountKey) -> BTreeMap<String, Decimal> {
        let owner = account.address();
        let reads = self.faucet_tokens.iter().map(|token| async move {
            let balance = self.read_token(token, owner).await.unwrap_or_else(|e| {
                warn!(symbol = %token.symbol, error = %e, "token balance read failed");
                Decimal::ZERO
            });
            (token.symbol.clone(), balance)
        });
        join_all(reads).await.into_iter().collect()
    }

    async fn read_token(&self, token: &TokenDescriptor, owner: Address) -> Result<Decimal> {
        let raw = self.chain.token_balance(token.address, owner).await?;
        amount::from_raw(raw, token.decimals)
    }
}
