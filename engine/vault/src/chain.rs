//! The chain capability consumed by the engine.
//!
//! [`VaultChain`] is the only seam between the engine and the network. The
//! production implementation is [`crate::rpc::RpcChain`]; tests drive the
//! engine through an in-memory chain instead.
//!
//! Write methods submit a transaction signed by [`VaultChain::signer`] and
//! wait until it is mined. A mined transaction whose receipt reports failure
//! is returned as [`crate::VaultError::Reverted`].

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use crate::error::Result;

/// The four event shapes emitted by the supported vaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultEventKind {
    /// `Deposit(address indexed user, uint256 amount)`
    NativeDeposit,
    /// `Withdraw(address indexed user, uint256 amount)`
    NativeWithdraw,
    /// `Deposit(address indexed caller, address indexed owner, uint256 assets, uint256 shares)`
    ShareDeposit,
    /// `Withdraw(address indexed caller, address indexed receiver, address indexed owner, uint256 assets, uint256 shares)`
    ShareWithdraw,
}

/// A decoded vault event with every field of its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    NativeDeposit {
        user: Address,
        amount: U256,
    },
    NativeWithdraw {
        user: Address,
        amount: U256,
    },
    ShareDeposit {
        caller: Address,
        owner: Address,
        assets: U256,
        shares: U256,
    },
    ShareWithdraw {
        caller: Address,
        receiver: Address,
        owner: Address,
        assets: U256,
        shares: U256,
    },
}

impl DecodedEvent {
    pub fn kind(&self) -> VaultEventKind {
        match self {
            Self::NativeDeposit { .. } => VaultEventKind::NativeDeposit,
            Self::NativeWithdraw { .. } => VaultEventKind::NativeWithdraw,
            Self::ShareDeposit { .. } => VaultEventKind::ShareDeposit,
            Self::ShareWithdraw { .. } => VaultEventKind::ShareWithdraw,
        }
    }
}

/// One log entry returned by [`VaultChain::vault_logs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLog {
    pub event: DecodedEvent,
    /// Absent for logs of pending blocks.
    pub tx_hash: Option<TxHash>,
    pub block_number: Option<u64>,
}

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// The `lookback` blocks ending at `head`, clamped at genesis.
    pub fn lookback(head: u64, lookback: u64) -> Self {
        Self {
            from: head.saturating_sub(lookback),
            to: head,
        }
    }

    /// Splits the range into consecutive chunks of at most `size` blocks.
    pub fn chunks(self, size: u64) -> impl Iterator<Item = BlockRange> {
        let size = size.max(1);
        let mut next = Some(self.from);
        std::iter::from_fn(move || {
            let from = next?;
            if from > self.to {
                return None;
            }
            let to = from.saturating_add(size - 1).min(self.to);
            next = to.checked_add(1);
            Some(BlockRange { from, to })
        })
    }
}

/// Log filter for one event stream of one vault, narrowed to an account.
///
/// Backends place `account` on the indexed topic that identifies the
/// beneficiary of the event shape: `user` for native events, `owner` for
/// ERC-4626 events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub vault: Address,
    pub event: VaultEventKind,
    pub account: Address,
    pub range: BlockRange,
}

/// Chain access needed by the engine.
#[async_trait]
pub trait VaultChain: Send + Sync {
    /// Account that signs submitted transactions.
    fn signer(&self) -> Address;

    // ------------------------------------------------------------------
    // Blocks and logs
    // ------------------------------------------------------------------
    async fn block_number(&self) -> Result<u64>;

    /// Timestamp of block `number`, `None` if the node does not know it.
    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>>;

    async fn vault_logs(&self, query: &LogQuery) -> Result<Vec<VaultLog>>;

    // ------------------------------------------------------------------
    // Native vault
    // ------------------------------------------------------------------
    /// `balances(account)`
    async fn native_vault_balance(&self, vault: Address, account: Address) -> Result<U256>;

    /// `deposit()` with `value` attached.
    async fn native_deposit(&self, vault: Address, value: U256) -> Result<TxHash>;

    /// `withdraw(amount)`
    async fn native_withdraw(&self, vault: Address, amount: U256) -> Result<TxHash>;

    // ------------------------------------------------------------------
    // ERC-4626 vault
    // ------------------------------------------------------------------
    /// `balanceOf(account)` in shares.
    async fn share_balance(&self, vault: Address, account: Address) -> Result<U256>;

    async fn convert_to_assets(&self, vault: Address, shares: U256) -> Result<U256>;

    async fn convert_to_shares(&self, vault: Address, assets: U256) -> Result<U256>;

    /// `deposit(assets, receiver)`
    async fn share_deposit(&self, vault: Address, assets: U256, receiver: Address)
        -> Result<TxHash>;

    /// `redeem(shares, receiver, owner)`
    async fn redeem(
        &self,
        vault: Address,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<TxHash>;

    // ------------------------------------------------------------------
    // ERC-20 and faucet
    // ------------------------------------------------------------------
    async fn token_balance(&self, token: Address, account: Address) -> Result<U256>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256>;

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash>;

    /// `requestTokens(token)` on the faucet.
    async fn request_tokens(&self, faucet: Address, token: Address) -> Result<TxHash>;
}
