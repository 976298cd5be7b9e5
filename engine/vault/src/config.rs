//! Engine configuration.
//!
//! Configuration is loaded once at startup, either from a JSON document or
//! from environment variables. Any missing or malformed value is fatal and the
//! error names the offending key.
//!
//! ## Environment layout
//!
//! ```text
//! VAULT_RPC_URL                  JSON-RPC endpoint (required)
//! VAULT_FAUCET_ADDRESS           faucet contract (required)
//! VAULT_<SYMBOL>_VAULT           vault contract, one per asset (required)
//! VAULT_<SYMBOL>_TOKEN           underlying ERC-20, share-based vaults only (required)
//! VAULT_CHAIN_ID                 optional, defaults to Mantle Sepolia (5003)
//! VAULT_POLL_INTERVAL_SECS       optional, defaults to 15
//! VAULT_HISTORY_LOOKBACK_BLOCKS  optional, defaults to 8000
//! VAULT_CACHE_DIR                optional, defaults to `.vault-cache`
//! ```
//!
//! `<SYMBOL>` is the upper-cased ticker, e.g. `VAULT_AAPLX_VAULT`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::registry::{
    AccountingModel, TokenDescriptor, VaultDescriptor, VaultGroup, VaultRegistry,
};

/// Mantle Sepolia.
pub const DEFAULT_CHAIN_ID: u64 = 5003;
pub const DEFAULT_EXPLORER_TX_URL: &str = "https://sepolia.mantlescan.xyz/tx/";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Assets deployed by the default layout: symbol, decimals, model, group.
const DEFAULT_LAYOUT: &[(&str, u8, AccountingModel, VaultGroup)] = &[
    ("MNT", 18, AccountingModel::DirectBalance, VaultGroup::Stable),
    ("USDC", 6, AccountingModel::ShareBased, VaultGroup::Stable),
    ("USDT", 6, AccountingModel::ShareBased, VaultGroup::Stable),
    ("DAI", 18, AccountingModel::ShareBased, VaultGroup::Stable),
    ("AAPLx", 18, AccountingModel::ShareBased, VaultGroup::Equity),
    ("TSLAx", 18, AccountingModel::ShareBased, VaultGroup::Equity),
    ("NVDAx", 18, AccountingModel::ShareBased, VaultGroup::Equity),
];

/// Settings of the activity indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    /// Blocks scanned back from the chain head.
    pub lookback_blocks: u64,
    /// Blocks per `eth_getLogs` request.
    pub chunk_size: u64,
    /// Records kept after merging.
    pub max_records: usize,
    /// Prefix of the persisted cache key.
    pub cache_prefix: String,
    /// Directory of the file-backed history store.
    pub cache_dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            lookback_blocks: 8_000,
            chunk_size: 2_000,
            max_records: 14,
            cache_prefix: "vault-history".to_string(),
            cache_dir: PathBuf::from(".vault-cache"),
        }
    }
}

/// Reports an absent key the same way the environment loader does.
fn json_error(err: serde_json::Error) -> VaultError {
    let message = err.to_string();
    let missing = message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split_once('`'))
        .map(|(key, _)| key.to_string());
    match missing {
        Some(key) => VaultError::MissingConfig(key),
        None => VaultError::InvalidConfig(message),
    }
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

fn default_explorer_tx_url() -> String {
    DEFAULT_EXPLORER_TX_URL.to_string()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

/// Everything the engine needs to run against one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_explorer_tx_url")]
    pub explorer_tx_url: String,
    pub faucet_address: Address,
    #[serde(default)]
    pub faucet_tokens: Vec<TokenDescriptor>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub history: HistoryConfig,
    pub vaults: VaultRegistry,
}

impl EngineConfig {
    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(json_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the default layout from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the default layout through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let mut vaults = Vec::with_capacity(DEFAULT_LAYOUT.len());
        let mut faucet_tokens = Vec::new();
        for &(symbol, decimals, accounting, group) in DEFAULT_LAYOUT {
            let prefix = format!("VAULT_{}", symbol.to_uppercase());
            let vault_address = env.address(&format!("{prefix}_VAULT"))?;
            let vault = match accounting {
                AccountingModel::DirectBalance => VaultDescriptor::native(symbol, vault_address),
                AccountingModel::ShareBased => {
                    let token = env.address(&format!("{prefix}_TOKEN"))?;
                    faucet_tokens.push(TokenDescriptor {
                        symbol: symbol.to_string(),
                        decimals,
                        address: token,
                    });
                    VaultDescriptor::share_based(symbol, decimals, group, token, vault_address)
                }
            };
            vaults.push(vault);
        }

        let mut history = HistoryConfig::default();
        if let Some(lookback) = env.optional_parse("VAULT_HISTORY_LOOKBACK_BLOCKS")? {
            history.lookback_blocks = lookback;
        }
        if let Some(dir) = env.optional("VAULT_CACHE_DIR") {
            history.cache_dir = PathBuf::from(dir);
        }

        let config = Self {
            rpc_url: env.required("VAULT_RPC_URL")?,
            chain_id: env
                .optional_parse("VAULT_CHAIN_ID")?
                .unwrap_or(DEFAULT_CHAIN_ID),
            explorer_tx_url: default_explorer_tx_url(),
            faucet_address: env.address("VAULT_FAUCET_ADDRESS")?,
            faucet_tokens,
            poll_interval_secs: env
                .optional_parse("VAULT_POLL_INTERVAL_SECS")?
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            history,
            vaults: VaultRegistry::new(vaults)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.rpc_url.trim().is_empty() {
            return Err(VaultError::MissingConfig("rpcUrl".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(VaultError::InvalidConfig("poll interval must be positive".to_string()));
        }
        if self.history.chunk_size == 0 || self.history.max_records == 0 {
            return Err(VaultError::InvalidConfig(
                "history chunk size and record cap must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| VaultError::MissingConfig(key.to_string()))
    }

    fn address(&self, key: &str) -> Result<Address> {
        let raw = self.required(key)?;
        Address::from_str(raw.trim())
            .map_err(|_| VaultError::InvalidConfig(format!("{key} is not an address: {raw}")))
    }

    fn optional_parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        self.optional(key)
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|_| VaultError::InvalidConfig(format!("{key} is malformed: {raw}")))
            })
            .transpose()
    }
}
