//! [`VaultChain`] over a JSON-RPC provider.
//!
//! Contract bindings come from [`crate::abi`]. Every write waits for its
//! receipt so callers observe the mined state when the future resolves.

use alloy::{
    eips::BlockNumberOrTag,
    network::{EthereumWallet, ReceiptResponse},
    primitives::{Address, TxHash, U256},
    providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder},
    rpc::types::{Filter, Log},
    signers::local::PrivateKeySigner,
    sol_types::SolEvent,
};
use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::abi::{IERC20, IFaucet, INativeVault, IShareVault};
use crate::chain::{DecodedEvent, LogQuery, VaultChain, VaultEventKind, VaultLog};
use crate::error::{Result, VaultError};

/// Chain backend driven by an alloy provider.
#[derive(Clone)]
pub struct RpcChain {
    provider: DynProvider,
    signer: Address,
}

impl RpcChain {
    /// Wraps an existing provider whose wallet signs for `signer`.
    pub fn new(provider: DynProvider, signer: Address) -> Self {
        Self { provider, signer }
    }

    /// Connects over HTTP with a local private-key wallet.
    pub fn connect(rpc_url: &str, signer: PrivateKeySigner) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|_| VaultError::InvalidConfig(format!("rpc url is malformed: {rpc_url}")))?;
        let address = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();
        Ok(Self::new(provider, address))
    }

    async fn confirm(&self, pending: PendingTransactionBuilder<alloy::network::Ethereum>) -> Result<TxHash> {
        let hash = *pending.tx_hash();
        debug!(tx_hash = %hash, "transaction submitted");
        let receipt = pending.get_receipt().await?;
        if !receipt.status() {
            return Err(VaultError::Reverted(hash));
        }
        Ok(receipt.transaction_hash())
    }
}

fn filter_for(query: &LogQuery) -> Filter {
    let account = query.account.into_word();
    let base = Filter::new()
        .address(query.vault)
        .from_block(query.range.from)
        .to_block(query.range.to);

    match query.event {
        VaultEventKind::NativeDeposit => base
            .event_signature(INativeVault::Deposit::SIGNATURE_HASH)
            .topic1(account),
        VaultEventKind::NativeWithdraw => base
            .event_signature(INativeVault::Withdraw::SIGNATURE_HASH)
            .topic1(account),
        VaultEventKind::ShareDeposit => base
            .event_signature(IShareVault::Deposit::SIGNATURE_HASH)
            .topic2(account),
        VaultEventKind::ShareWithdraw => base
            .event_signature(IShareVault::Withdraw::SIGNATURE_HASH)
            .topic3(account),
    }
}

fn decode(kind: VaultEventKind, log: &Log) -> Result<DecodedEvent> {
    let err = |e: alloy::sol_types::Error| VaultError::Rpc(format!("undecodable {kind:?} log: {e}"));
    let event = match kind {
        VaultEventKind::NativeDeposit => {
            let e = log.log_decode::<INativeVault::Deposit>().map_err(err)?.inner.data;
            DecodedEvent::NativeDeposit {
                user: e.user,
                amount: e.amount,
            }
        }
        VaultEventKind::NativeWithdraw => {
            let e = log.log_decode::<INativeVault::Withdraw>().map_err(err)?.inner.data;
            DecodedEvent::NativeWithdraw {
                user: e.user,
                amount: e.amount,
            }
        }
        VaultEventKind::ShareDeposit => {
            let e = log.log_decode::<IShareVault::Deposit>().map_err(err)?.inner.data;
            DecodedEvent::ShareDeposit {
                caller: e.caller,
                owner: e.owner,
                assets: e.assets,
                shares: e.shares,
            }
        }
        VaultEventKind::ShareWithdraw => {
            let e = log.log_decode::<IShareVault::Withdraw>().map_err(err)?.inner.data;
            DecodedEvent::ShareWithdraw {
                caller: e.caller,
                receiver: e.receiver,
                owner: e.owner,
                assets: e.assets,
                shares: e.shares,
            }
        }
    };
    Ok(event)
}

#[async_trait]
impl VaultChain for RpcChain {
    fn signer(&self) -> Address {
        self.signer
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await?;
        Ok(block.map(|b| b.header.timestamp))
    }

    #[instrument(skip(self), fields(vault = %query.vault, event = ?query.event))]
    async fn vault_logs(&self, query: &LogQuery) -> Result<Vec<VaultLog>> {
        let logs = self.provider.get_logs(&filter_for(query)).await?;
        debug!(count = logs.len(), from = query.range.from, to = query.range.to, "fetched logs");
        logs.iter()
            .map(|log| {
                Ok(VaultLog {
                    event: decode(query.event, log)?,
                    tx_hash: log.transaction_hash,
                    block_number: log.block_number,
                })
            })
            .collect()
    }

    async fn native_vault_balance(&self, vault: Address, account: Address) -> Result<U256> {
        let vault = INativeVault::new(vault, self.provider.clone());
        Ok(vault.balances(account).call().await?)
    }

    async fn native_deposit(&self, vault: Address, value: U256) -> Result<TxHash> {
        let vault = INativeVault::new(vault, self.provider.clone());
        let pending = vault.deposit().value(value).send().await?;
        self.confirm(pending).await
    }

    async fn native_withdraw(&self, vault: Address, amount: U256) -> Result<TxHash> {
        let vault = INativeVault::new(vault, self.provider.clone());
        let pending = vault.withdraw(amount).send().await?;
        self.confirm(pending).await
    }

    async fn share_balance(&self, vault: Address, account: Address) -> Result<U256> {
        let vault = IShareVault::new(vault, self.provider.clone());
        Ok(vault.balanceOf(account).call().await?)
    }

    async fn convert_to_assets(&self, vault: Address, shares: U256) -> Result<U256> {
        let vault = IShareVault::new(vault, self.provider.clone());
        Ok(vault.convertToAssets(shares).call().await?)
    }

    async fn convert_to_shares(&self, vault: Address, assets: U256) -> Result<U256> {
        let vault = IShareVault::new(vault, self.provider.clone());
        Ok(vault.convertToShares(assets).call().await?)
    }

    async fn share_deposit(
        &self,
        vault: Address,
        assets: U256,
        receiver: Address,
    ) -> Result<TxHash> {
        let vault = IShareVault::new(vault, self.provider.clone());
        let pending = vault.deposit(assets, receiver).send().await?;
        self.confirm(pending).await
    }

    async fn redeem(
        &self,
        vault: Address,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<TxHash> {
        let vault = IShareVault::new(vault, self.provider.clone());
        let pending = vault.redeem(shares, receiver, owner).send().await?;
        self.confirm(pending).await
    }

    async fn token_balance(&self, token: Address, account: Address) -> Result<U256> {
        let token = IERC20::new(token, self.provider.clone());
        Ok(token.balanceOf(account).call().await?)
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let token = IERC20::new(token, self.provider.clone());
        Ok(token.allowance(owner, spender).call().await?)
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash> {
        let token = IERC20::new(token, self.provider.clone());
        let pending = token.approve(spender, amount).send().await?;
        self.confirm(pending).await
    }

    async fn request_tokens(&self, faucet: Address, token: Address) -> Result<TxHash> {
        let faucet = IFaucet::new(faucet, self.provider.clone());
        let pending = faucet.requestTokens(token).send().await?;
        self.confirm(pending).await
    }
}

#[cfg(test)]
mod tests {
    use alloy::rpc::types::FilterBlockOption;

    use super::*;
    use crate::chain::BlockRange;

    #[test]
    fn account_sits_on_the_beneficiary_topic() {
        let account = Address::repeat_byte(0xaa);
        let query = |event| LogQuery {
            vault: Address::repeat_byte(0x01),
            event,
            account,
            range: BlockRange { from: 10, to: 20 },
        };

        let native = filter_for(&query(VaultEventKind::NativeDeposit));
        assert!(native.topics[1].matches(&account.into_word()));
        assert!(native.topics[2].is_empty());

        let deposit = filter_for(&query(VaultEventKind::ShareDeposit));
        assert!(deposit.topics[1].is_empty());
        assert!(deposit.topics[2].matches(&account.into_word()));

        let withdraw = filter_for(&query(VaultEventKind::ShareWithdraw));
        assert!(withdraw.topics[2].is_empty());
        assert!(withdraw.topics[3].matches(&account.into_word()));
        assert!(withdraw.topics[0].matches(&IShareVault::Withdraw::SIGNATURE_HASH));

        assert!(matches!(
            native.block_option,
            FilterBlockOption::Range { from_block: Some(_), to_block: Some(_) }
        ));
    }
}
