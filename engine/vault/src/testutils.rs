#![cfg(test)]

//! In-memory chain that simulates the vault, token and faucet contracts.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{Address, TxHash, B256, U256};
use async_trait::async_trait;

use crate::chain::{DecodedEvent, LogQuery, VaultChain, VaultLog};
use crate::config::{EngineConfig, HistoryConfig};
use crate::error::{Result, VaultError};
use crate::registry::{TokenDescriptor, VaultDescriptor, VaultGroup, VaultRegistry};

pub const GENESIS_TIME: u64 = 1_700_000_000;
pub const BLOCK_TIME: u64 = 2;

pub fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

pub fn bob() -> Address {
    Address::repeat_byte(0xb0)
}

pub fn relayer() -> Address {
    Address::repeat_byte(0xee)
}

pub fn faucet() -> Address {
    Address::repeat_byte(0xfa)
}

pub fn mnt_vault() -> Address {
    Address::repeat_byte(0x10)
}

pub fn usdc_vault() -> Address {
    Address::repeat_byte(0x11)
}

pub fn usdt_vault() -> Address {
    Address::repeat_byte(0x12)
}

pub fn dai_vault() -> Address {
    Address::repeat_byte(0x13)
}

pub fn usdc_token() -> Address {
    Address::repeat_byte(0x21)
}

pub fn usdt_token() -> Address {
    Address::repeat_byte(0x22)
}

pub fn dai_token() -> Address {
    Address::repeat_byte(0x23)
}

/// `value * 10^decimals`
pub fn units(value: u64, decimals: u8) -> U256 {
    U256::from(value) * U256::from(10u8).pow(U256::from(decimals))
}

/// MNT, USDC, USDT, DAI.
pub fn registry() -> VaultRegistry {
    VaultRegistry::new(vec![
        VaultDescriptor::native("MNT", mnt_vault()),
        VaultDescriptor::share_based("USDC", 6, VaultGroup::Stable, usdc_token(), usdc_vault()),
        VaultDescriptor::share_based("USDT", 6, VaultGroup::Stable, usdt_token(), usdt_vault()),
        VaultDescriptor::share_based("DAI", 18, VaultGroup::Stable, dai_token(), dai_vault()),
    ])
    .unwrap()
}

pub fn config() -> EngineConfig {
    let vaults = registry();
    let faucet_tokens = vaults
        .all()
        .iter()
        .filter_map(|v| {
            v.token_address.map(|address| TokenDescriptor {
                symbol: v.symbol.clone(),
                decimals: v.decimals,
                address,
            })
        })
        .collect();
    EngineConfig {
        rpc_url: "http://localhost:8545".to_string(),
        chain_id: 5003,
        explorer_tx_url: "https://sepolia.mantlescan.xyz/tx/".to_string(),
        faucet_address: faucet(),
        faucet_tokens,
        poll_interval_secs: 15,
        history: HistoryConfig {
            cache_dir: PathBuf::from("unused"),
            ..HistoryConfig::default()
        },
        vaults,
    }
}

/// A chain with the default registry deployed and `alice` as signer.
pub fn deployed() -> Arc<MockChain> {
    let chain = MockChain::new(alice());
    chain.add_native_vault(mnt_vault());
    chain.add_share_vault(usdc_vault(), usdc_token());
    chain.add_share_vault(usdt_vault(), usdt_token());
    chain.add_share_vault(dai_vault(), dai_token());
    chain.add_token(usdc_token(), units(1_000, 6));
    chain.add_token(usdt_token(), units(1_000, 6));
    chain.add_token(dai_token(), units(1_000, 18));
    Arc::new(chain)
}

#[derive(Default)]
struct ShareVault {
    token: Address,
    total_assets: U256,
    total_shares: U256,
    shares: HashMap<Address, U256>,
}

impl ShareVault {
    fn to_shares(&self, assets: U256) -> U256 {
        if self.total_assets.is_zero() {
            assets
        } else {
            assets * self.total_shares / self.total_assets
        }
    }

    fn to_assets(&self, shares: U256) -> U256 {
        if self.total_shares.is_zero() {
            shares
        } else {
            shares * self.total_assets / self.total_shares
        }
    }
}

#[derive(Default)]
struct Token {
    drip: U256,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

#[derive(Default)]
struct State {
    signer: Address,
    head: u64,
    txs: u64,
    native: HashMap<Address, HashMap<Address, U256>>,
    share_vaults: HashMap<Address, ShareVault>,
    tokens: HashMap<Address, Token>,
    logs: Vec<(Address, VaultLog)>,
    failing: HashSet<Address>,
    failing_writes: HashSet<Address>,
    missing_blocks: HashSet<u64>,
    unfiltered_logs: bool,
    unreachable: bool,
    calls: Vec<String>,
}

impl State {
    fn touch(&mut self, call: &str, target: Address) -> Result<()> {
        self.calls.push(format!("{call} {target}"));
        if self.failing.contains(&target) {
            return Err(VaultError::Rpc(format!("{call} failed")));
        }
        Ok(())
    }

    fn write(&mut self, call: &str, target: Address) -> Result<()> {
        self.touch(call, target)?;
        if self.failing_writes.contains(&target) {
            return Err(VaultError::Rpc("user rejected transaction".to_string()));
        }
        Ok(())
    }

    /// Mines one block holding one transaction.
    fn mine(&mut self) -> (TxHash, u64) {
        self.head += 1;
        self.txs += 1;
        (B256::left_padding_from(&self.txs.to_be_bytes()), self.head)
    }

    fn emit(&mut self, vault: Address, event: DecodedEvent) -> TxHash {
        let (tx_hash, block) = self.mine();
        self.logs.push((
            vault,
            VaultLog {
                event,
                tx_hash: Some(tx_hash),
                block_number: Some(block),
            },
        ));
        tx_hash
    }

    fn share_vault(&mut self, vault: Address) -> Result<&mut ShareVault> {
        self.share_vaults
            .get_mut(&vault)
            .ok_or_else(|| VaultError::Rpc(format!("no share vault at {vault}")))
    }

    fn token(&mut self, token: Address) -> Result<&mut Token> {
        self.tokens
            .get_mut(&token)
            .ok_or_else(|| VaultError::Rpc(format!("no token at {token}")))
    }
}

fn reverted(reason: &str) -> VaultError {
    VaultError::Rpc(format!("execution reverted: {reason}"))
}

pub struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    pub fn new(signer: Address) -> Self {
        Self {
            state: Mutex::new(State {
                signer,
                head: 1_000,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_signer(&self, signer: Address) {
        self.state().signer = signer;
    }

    pub fn add_native_vault(&self, vault: Address) {
        self.state().native.entry(vault).or_default();
    }

    pub fn add_share_vault(&self, vault: Address, token: Address) {
        self.state().share_vaults.insert(
            vault,
            ShareVault {
                token,
                ..ShareVault::default()
            },
        );
    }

    pub fn add_token(&self, token: Address, drip: U256) {
        self.state().tokens.insert(
            token,
            Token {
                drip,
                ..Token::default()
            },
        );
    }

    /// Seeds pooled assets and shares held by nobody in particular.
    pub fn seed_share_price(&self, vault: Address, total_assets: U256, total_shares: U256) {
        let mut state = self.state();
        let vault = state.share_vaults.get_mut(&vault).unwrap();
        vault.total_assets = total_assets;
        vault.total_shares = total_shares;
    }

    /// Grants shares to `account` without a Deposit event.
    pub fn grant_shares(&self, vault: Address, account: Address, shares: U256, assets: U256) {
        let mut state = self.state();
        let vault = state.share_vaults.get_mut(&vault).unwrap();
        *vault.shares.entry(account).or_default() += shares;
        vault.total_shares += shares;
        vault.total_assets += assets;
    }

    pub fn set_native_balance(&self, vault: Address, account: Address, amount: U256) {
        self.state()
            .native
            .entry(vault)
            .or_default()
            .insert(account, amount);
    }

    pub fn mint(&self, token: Address, account: Address, amount: U256) {
        *self
            .state()
            .tokens
            .get_mut(&token)
            .unwrap()
            .balances
            .entry(account)
            .or_default() += amount;
    }

    pub fn shares_of(&self, vault: Address, account: Address) -> U256 {
        self.state().share_vaults[&vault]
            .shares
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    pub fn wallet_balance(&self, token: Address, account: Address) -> U256 {
        self.state().tokens[&token]
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    /// Appends an arbitrary event in a new block.
    pub fn push_event(&self, vault: Address, event: DecodedEvent) -> TxHash {
        self.state().emit(vault, event)
    }

    /// Appends an event in an existing block.
    pub fn push_event_at(&self, vault: Address, event: DecodedEvent, tx_hash: TxHash, block: u64) {
        self.state().logs.push((
            vault,
            VaultLog {
                event,
                tx_hash: Some(tx_hash),
                block_number: Some(block),
            },
        ));
    }

    pub fn advance_blocks(&self, blocks: u64) {
        self.state().head += blocks;
    }

    /// Every call touching `address` fails.
    pub fn fail(&self, address: Address) {
        self.state().failing.insert(address);
    }

    pub fn heal(&self, address: Address) {
        let mut state = self.state();
        state.failing.remove(&address);
        state.failing_writes.remove(&address);
    }

    /// Transactions sent to `address` are rejected.
    pub fn reject_writes(&self, address: Address) {
        self.state().failing_writes.insert(address);
    }

    /// Make `block_number` fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn forget_block(&self, block: u64) {
        self.state().missing_blocks.insert(block);
    }

    /// Make `vault_logs` ignore the account filter, like a node without topic
    /// filtering.
    pub fn disable_log_filter(&self) {
        self.state().unfiltered_logs = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

fn beneficiary(event: &DecodedEvent) -> Address {
    match event {
        DecodedEvent::NativeDeposit { user, .. } | DecodedEvent::NativeWithdraw { user, .. } => *user,
        DecodedEvent::ShareDeposit { owner, .. } | DecodedEvent::ShareWithdraw { owner, .. } => *owner,
    }
}

#[async_trait]
impl VaultChain for MockChain {
    fn signer(&self) -> Address {
        self.state().signer
    }

    async fn block_number(&self) -> Result<u64> {
        let mut state = self.state();
        state.calls.push("block_number".to_string());
        if state.unreachable {
            return Err(VaultError::Rpc("connection refused".to_string()));
        }
        Ok(state.head)
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>> {
        let mut state = self.state();
        state.calls.push(format!("block_timestamp {number}"));
        if number > state.head || state.missing_blocks.contains(&number) {
            return Ok(None);
        }
        Ok(Some(GENESIS_TIME + number * BLOCK_TIME))
    }

    async fn vault_logs(&self, query: &LogQuery) -> Result<Vec<VaultLog>> {
        let mut state = self.state();
        state.touch("vault_logs", query.vault)?;
        let unfiltered = state.unfiltered_logs;
        Ok(state
            .logs
            .iter()
            .filter(|(vault, log)| {
                let block = log.block_number.unwrap_or_default();
                *vault == query.vault
                    && log.event.kind() == query.event
                    && (query.range.from..=query.range.to).contains(&block)
                    && (unfiltered || beneficiary(&log.event) == query.account)
            })
            .map(|(_, log)| log.clone())
            .collect())
    }

    async fn native_vault_balance(&self, vault: Address, account: Address) -> Result<U256> {
        let mut state = self.state();
        state.touch("balances", vault)?;
        Ok(state
            .native
            .get(&vault)
            .and_then(|balances| balances.get(&account))
            .copied()
            .unwrap_or_default())
    }

    async fn native_deposit(&self, vault: Address, value: U256) -> Result<TxHash> {
        let mut state = self.state();
        state.write("deposit", vault)?;
        let user = state.signer;
        *state.native.entry(vault).or_default().entry(user).or_default() += value;
        Ok(state.emit(vault, DecodedEvent::NativeDeposit { user, amount: value }))
    }

    async fn native_withdraw(&self, vault: Address, amount: U256) -> Result<TxHash> {
        let mut state = self.state();
        state.write("withdraw", vault)?;
        let user = state.signer;
        let balance = state.native.entry(vault).or_default().entry(user).or_default();
        if *balance < amount {
            return Err(reverted("insufficient balance"));
        }
        *balance -= amount;
        Ok(state.emit(vault, DecodedEvent::NativeWithdraw { user, amount }))
    }

    async fn share_balance(&self, vault: Address, account: Address) -> Result<U256> {
        let mut state = self.state();
        state.touch("balanceOf", vault)?;
        Ok(state
            .share_vault(vault)?
            .shares
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn convert_to_assets(&self, vault: Address, shares: U256) -> Result<U256> {
        let mut state = self.state();
        state.touch("convertToAssets", vault)?;
        Ok(state.share_vault(vault)?.to_assets(shares))
    }

    async fn convert_to_shares(&self, vault: Address, assets: U256) -> Result<U256> {
        let mut state = self.state();
        state.touch("convertToShares", vault)?;
        Ok(state.share_vault(vault)?.to_shares(assets))
    }

    async fn share_deposit(&self, vault: Address, assets: U256, receiver: Address) -> Result<TxHash> {
        let mut state = self.state();
        state.write("vault.deposit", vault)?;
        let caller = state.signer;
        let token_address = state.share_vault(vault)?.token;

        let token = state.token(token_address)?;
        let allowance = token.allowances.get(&(caller, vault)).copied().unwrap_or_default();
        let balance = token.balances.get(&caller).copied().unwrap_or_default();
        if allowance < assets {
            return Err(reverted("insufficient allowance"));
        }
        if balance < assets {
            return Err(reverted("insufficient balance"));
        }
        token.allowances.insert((caller, vault), allowance - assets);
        token.balances.insert(caller, balance - assets);

        let pool = state.share_vault(vault)?;
        let shares = pool.to_shares(assets);
        *pool.shares.entry(receiver).or_default() += shares;
        pool.total_shares += shares;
        pool.total_assets += assets;

        Ok(state.emit(
            vault,
            DecodedEvent::ShareDeposit {
                caller,
                owner: receiver,
                assets,
                shares,
            },
        ))
    }

    async fn redeem(
        &self,
        vault: Address,
        shares: U256,
        receiver: Address,
        owner: Address,
    ) -> Result<TxHash> {
        let mut state = self.state();
        state.write("redeem", vault)?;
        let caller = state.signer;
        if caller != owner {
            return Err(reverted("caller is not owner"));
        }

        let pool = state.share_vault(vault)?;
        let held = pool.shares.entry(owner).or_default();
        if *held < shares {
            return Err(reverted("redeem exceeds balance"));
        }
        *held -= shares;
        let assets = pool.to_assets(shares);
        pool.total_shares -= shares;
        pool.total_assets -= assets;
        let token_address = pool.token;

        *state
            .token(token_address)?
            .balances
            .entry(receiver)
            .or_default() += assets;

        Ok(state.emit(
            vault,
            DecodedEvent::ShareWithdraw {
                caller,
                receiver,
                owner,
                assets,
                shares,
            },
        ))
    }

    async fn token_balance(&self, token: Address, account: Address) -> Result<U256> {
        let mut state = self.state();
        state.touch("token.balanceOf", token)?;
        Ok(state
            .token(token)?
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let mut state = self.state();
        state.touch("allowance", token)?;
        Ok(state
            .token(token)?
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash> {
        let mut state = self.state();
        state.write("approve", token)?;
        let owner = state.signer;
        state.token(token)?.allowances.insert((owner, spender), amount);
        Ok(state.mine().0)
    }

    async fn request_tokens(&self, faucet: Address, token: Address) -> Result<TxHash> {
        let mut state = self.state();
        state.write("requestTokens", token)?;
        state.calls.push(format!("faucet {faucet}"));
        let account = state.signer;
        let entry = state.token(token)?;
        let drip = entry.drip;
        *entry.balances.entry(account).or_default() += drip;
        Ok(state.mine().0)
    }
}
