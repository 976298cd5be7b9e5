//! Vault accounting models behind one interface.
//!
//! Native vaults keep a balance mapping that is already denominated in the
//! asset. ERC-4626 vaults hold shares whose value must be converted through
//! the vault's share price. [`VaultAccounting`] hides that difference: the
//! reconciler, executor and indexer call the same four operations on every
//! vault and never look at [`AccountingModel`] themselves.
//!
//! ```text
//!                      VaultAccounting
//!             ┌───────────────┴───────────────┐
//!   DirectBalanceVault                  ShareBasedVault
//!   balances(account)                   balanceOf → convertToAssets
//!   deposit{value}                      allowance → approve → deposit
//!   withdraw(amount)                    convertToShares | balanceOf → redeem
//!   Deposit/Withdraw(user)              Deposit/Withdraw(.., owner, ..)
//! ```

use std::sync::Arc;

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::amount::{self, NATIVE_DECIMALS};
use crate::chain::{BlockRange, DecodedEvent, LogQuery, VaultChain, VaultEventKind, VaultLog};
use crate::error::{Result, VaultError};
use crate::registry::{AccountingModel, VaultDescriptor};

/// Deposit or withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TxKind {
    Deposit,
    Withdraw,
}

/// Amount requested by a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawAmount {
    /// User-entered amount in asset units.
    Exact(String),
    /// Everything, with the last reconciled deposited amount for the asset.
    All { reconciled: Decimal },
}

/// One matched vault event before block timestamps are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultActivity {
    pub kind: TxKind,
    /// Asset amount in human units.
    pub amount: Decimal,
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// Operations every vault supports regardless of its accounting model.
#[async_trait]
pub trait VaultAccounting: Send + Sync + std::fmt::Debug {
    fn descriptor(&self) -> &VaultDescriptor;

    /// Assets currently attributable to `account`, in human units.
    async fn deposited(&self, chain: &dyn VaultChain, account: Address) -> Result<Decimal>;

    /// Deposits `amount` (user input, asset units) for `account`.
    async fn deposit(
        &self,
        chain: &dyn VaultChain,
        account: Address,
        amount: &str,
    ) -> Result<TxHash>;

    /// Withdraws to `account`.
    async fn withdraw(
        &self,
        chain: &dyn VaultChain,
        account: Address,
        amount: WithdrawAmount,
    ) -> Result<TxHash>;

    /// Event streams scanned for history, in query order.
    fn event_streams(&self) -> [VaultEventKind; 2];

    /// Maps a log to activity of `account`, `None` if it belongs to someone else.
    fn attribute(&self, log: &VaultLog, account: Address) -> Result<Option<VaultActivity>>;

    /// Deposits and withdrawals of `account` inside `range`.
    async fn activity(
        &self,
        chain: &dyn VaultChain,
        account: Address,
        range: BlockRange,
    ) -> Result<Vec<VaultActivity>> {
        let vault = self.descriptor().vault_address;
        let mut matched = Vec::new();
        for event in self.event_streams() {
            let query = LogQuery {
                vault,
                event,
                account,
                range,
            };
            for log in chain.vault_logs(&query).await? {
                match self.attribute(&log, account) {
                    Ok(Some(activity)) => matched.push(activity),
                    Ok(None) => {}
                    Err(e) => warn!(
                        symbol = %self.descriptor().symbol,
                        tx_hash = ?log.tx_hash,
                        error = %e,
                        "skipping unreadable log"
                    ),
                }
            }
        }
        Ok(matched)
    }
}

/// Builds the accounting implementation for a vault.
pub fn accounting_for(descriptor: VaultDescriptor) -> Arc<dyn VaultAccounting> {
    match descriptor.accounting {
        AccountingModel::DirectBalance => Arc::new(DirectBalanceVault { descriptor }),
        AccountingModel::ShareBased => Arc::new(ShareBasedVault { descriptor }),
    }
}

fn activity_from(log: &VaultLog, kind: TxKind, raw: U256, decimals: u8) -> Result<VaultActivity> {
    let tx_hash = log
        .tx_hash
        .ok_or_else(|| VaultError::Rpc("log without transaction hash".to_string()))?;
    let block_number = log
        .block_number
        .ok_or_else(|| VaultError::Rpc("log without block number".to_string()))?;
    Ok(VaultActivity {
        kind,
        amount: amount::from_raw(raw, decimals)?,
        tx_hash,
        block_number,
    })
}

// ============================================================================
// DIRECT BALANCE
// ============================================================================

/// Native-currency vault with a `balances(address)` mapping.
#[derive(Debug, Clone)]
pub struct DirectBalanceVault {
    descriptor: VaultDescriptor,
}

#[async_trait]
impl VaultAccounting for DirectBalanceVault {
    fn descriptor(&self) -> &VaultDescriptor {
        &self.descriptor
    }

    async fn deposited(&self, chain: &dyn VaultChain, account: Address) -> Result<Decimal> {
        let raw = chain
            .native_vault_balance(self.descriptor.vault_address, account)
            .await?;
        amount::from_raw(raw, NATIVE_DECIMALS)
    }

    async fn deposit(
        &self,
        chain: &dyn VaultChain,
        _account: Address,
        amount: &str,
    ) -> Result<TxHash> {
        let value = amount::parse_units(amount, NATIVE_DECIMALS)?;
        info!(symbol = %self.descriptor.symbol, %value, "depositing native currency");
        chain.native_deposit(self.descriptor.vault_address, value).await
    }

    async fn withdraw(
        &self,
        chain: &dyn VaultChain,
        _account: Address,
        amount: WithdrawAmount,
    ) -> Result<TxHash> {
        let raw = match amount {
            WithdrawAmount::Exact(text) => amount::parse_units(&text, NATIVE_DECIMALS)?,
            WithdrawAmount::All { reconciled } => amount::to_raw(reconciled, NATIVE_DECIMALS)?,
        };
        if raw.is_zero() {
            return Err(VaultError::InvalidAmount("nothing to withdraw".to_string()));
        }
        info!(symbol = %self.descriptor.symbol, %raw, "withdrawing native currency");
        chain.native_withdraw(self.descriptor.vault_address, raw).await
    }

    fn event_streams(&self) -> [VaultEventKind; 2] {
        [VaultEventKind::NativeDeposit, VaultEventKind::NativeWithdraw]
    }

    fn attribute(&self, log: &VaultLog, account: Address) -> Result<Option<VaultActivity>> {
        let (kind, raw) = match log.event {
            DecodedEvent::NativeDeposit { user, amount } if user == account => {
                (TxKind::Deposit, amount)
            }
            DecodedEvent::NativeWithdraw { user, amount } if user == account => {
                (TxKind::Withdraw, amount)
            }
            _ => return Ok(None),
        };
        activity_from(log, kind, raw, self.descriptor.decimals).map(Some)
    }
}

// ============================================================================
// SHARE BASED
// ============================================================================

/// ERC-4626 vault whose balance is held in shares.
#[derive(Debug, Clone)]
pub struct ShareBasedVault {
    descriptor: VaultDescriptor,
}

impl ShareBasedVault {
    fn token(&self) -> Result<Address> {
        self.descriptor.token_address.ok_or_else(|| {
            VaultError::InvalidConfig(format!("{} has no token address", self.descriptor.symbol))
        })
    }
}

#[async_trait]
impl VaultAccounting for ShareBasedVault {
    fn descriptor(&self) -> &VaultDescriptor {
        &self.descriptor
    }

    async fn deposited(&self, chain: &dyn VaultChain, account: Address) -> Result<Decimal> {
        let vault = self.descriptor.vault_address;
        let shares = chain.share_balance(vault, account).await?;
        if shares.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let assets = chain.convert_to_assets(vault, shares).await?;
        amount::from_raw(assets, self.descriptor.decimals)
    }

    /// Approves the exact amount first when the current allowance is short.
    async fn deposit(
        &self,
        chain: &dyn VaultChain,
        account: Address,
        amount: &str,
    ) -> Result<TxHash> {
        let vault = self.descriptor.vault_address;
        let token = self.token()?;
        let assets = amount::parse_units(amount, self.descriptor.decimals)?;

        let allowance = chain.allowance(token, account, vault).await?;
        if allowance < assets {
            debug!(symbol = %self.descriptor.symbol, %allowance, %assets, "allowance short, approving");
            chain.approve(token, vault, assets).await?;
        }

        info!(symbol = %self.descriptor.symbol, %assets, "depositing into share vault");
        chain.share_deposit(vault, assets, account).await
    }

    /// Redeems shares. Withdraw-all reads the share balance so no dust is left
    /// behind by an assets-to-shares round trip.
    async fn withdraw(
        &self,
        chain: &dyn VaultChain,
        account: Address,
        amount: WithdrawAmount,
    ) -> Result<TxHash> {
        let vault = self.descriptor.vault_address;
        let shares = match amount {
            WithdrawAmount::All { .. } => chain.share_balance(vault, account).await?,
            WithdrawAmount::Exact(text) => {
                let assets = amount::parse_units(&text, self.descriptor.decimals)?;
                chain.convert_to_shares(vault, assets).await?
            }
        };
        if shares.is_zero() {
            return Err(VaultError::InvalidAmount("amount is worth zero shares".to_string()));
        }

        info!(symbol = %self.descriptor.symbol, %shares, "redeeming shares");
        chain.redeem(vault, shares, account, account).await
    }

    fn event_streams(&self) -> [VaultEventKind; 2] {
        [VaultEventKind::ShareDeposit, VaultEventKind::ShareWithdraw]
    }

    /// Attributes events to `owner`; `caller` and `receiver` may be relayers.
    fn attribute(&self, log: &VaultLog, account: Address) -> Result<Option<VaultActivity>> {
        let (kind, raw) = match log.event {
            DecodedEvent::ShareDeposit { owner, assets, .. } if owner == account => {
                (TxKind::Deposit, assets)
            }
            DecodedEvent::ShareWithdraw { owner, assets, .. } if owner == account => {
                (TxKind::Withdraw, assets)
            }
            _ => return Ok(None),
        };
        activity_from(log, kind, raw, self.descriptor.decimals).map(Some)
    }
}
