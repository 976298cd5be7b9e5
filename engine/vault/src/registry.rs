//! Static description of every vault and faucet token the engine talks to.
//!
//! The registry is loaded once at startup (see [`crate::config`]) and shared
//! read-only by every other component. It is validated on construction so
//! that downstream code can rely on the accounting invariants below.
//!
//! | model           | token address | decimals          |
//! |-----------------|---------------|-------------------|
//! | `DirectBalance` | absent        | 18 (native)       |
//! | `ShareBased`    | present       | underlying token  |

use std::collections::HashSet;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::amount::NATIVE_DECIMALS;
use crate::error::{Result, VaultError};

/// How a vault accounts for deposits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountingModel {
    /// Plain per-account balance mapping, 1:1 with the native currency.
    DirectBalance,
    /// ERC-4626 style shares convertible into pooled assets.
    ShareBased,
}

/// Logical grouping used by the dashboard screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VaultGroup {
    /// Native currency and stablecoins.
    Stable,
    /// Tokenized equities.
    Equity,
}

/// Yield tier of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetClass {
    Native,
    Stable,
    Equity,
}

/// One vault as described by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultDescriptor {
    /// Asset ticker, unique within a registry.
    pub symbol: String,
    /// Precision used to convert raw amounts.
    pub decimals: u8,
    pub accounting: AccountingModel,
    pub group: VaultGroup,
    /// Underlying ERC-20, absent for the native vault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_address: Option<Address>,
    pub vault_address: Address,
}

impl VaultDescriptor {
    /// Descriptor of the native-currency vault.
    pub fn native(symbol: impl Into<String>, vault_address: Address) -> Self {
        Self {
            symbol: symbol.into(),
            decimals: NATIVE_DECIMALS,
            accounting: AccountingModel::DirectBalance,
            group: VaultGroup::Stable,
            token_address: None,
            vault_address,
        }
    }

    /// Descriptor of an ERC-4626 vault over `token_address`.
    pub fn share_based(
        symbol: impl Into<String>,
        decimals: u8,
        group: VaultGroup,
        token_address: Address,
        vault_address: Address,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            decimals,
            accounting: AccountingModel::ShareBased,
            group,
            token_address: Some(token_address),
            vault_address,
        }
    }

    pub fn asset_class(&self) -> AssetClass {
        match (self.accounting, self.group) {
            (AccountingModel::DirectBalance, _) => AssetClass::Native,
            (_, VaultGroup::Equity) => AssetClass::Equity,
            (_, VaultGroup::Stable) => AssetClass::Stable,
        }
    }

    fn validate(&self) -> Result<()> {
        match (self.accounting, self.token_address) {
            (AccountingModel::DirectBalance, Some(_)) => Err(VaultError::InvalidConfig(format!(
                "{}: direct-balance vaults take no token address",
                self.symbol
            ))),
            (AccountingModel::DirectBalance, None) if self.decimals != NATIVE_DECIMALS => {
                Err(VaultError::InvalidConfig(format!(
                    "{}: direct-balance vaults use {NATIVE_DECIMALS} decimals",
                    self.symbol
                )))
            }
            (AccountingModel::ShareBased, None) => Err(VaultError::InvalidConfig(format!(
                "{}: share-based vaults need a token address",
                self.symbol
            ))),
            _ => Ok(()),
        }
    }
}

/// A token dispensed by the faucet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDescriptor {
    pub symbol: String,
    pub decimals: u8,
    pub address: Address,
}

/// Ordered, validated set of vaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VaultRegistry {
    vaults: Vec<VaultDescriptor>,
}

impl VaultRegistry {
    /// Builds a registry, checking symbol uniqueness and accounting invariants.
    pub fn new(vaults: Vec<VaultDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for vault in &vaults {
            if !seen.insert(vault.symbol.as_str()) {
                return Err(VaultError::InvalidConfig(format!(
                    "duplicate vault symbol {}",
                    vault.symbol
                )));
            }
            vault.validate()?;
        }
        Ok(Self { vaults })
    }

    /// Every vault in configuration order.
    pub fn all(&self) -> &[VaultDescriptor] {
        &self.vaults
    }

    /// Vaults of one group, in configuration order.
    pub fn group(&self, group: VaultGroup) -> Vec<VaultDescriptor> {
        self.vaults
            .iter()
            .filter(|v| v.group == group)
            .cloned()
            .collect()
    }

    pub fn get(&self, symbol: &str) -> Option<&VaultDescriptor> {
        self.vaults.iter().find(|v| v.symbol == symbol)
    }

    pub fn len(&self) -> usize {
        self.vaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }
}

impl<'de> Deserialize<'de> for VaultRegistry {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let vaults = Vec::<VaultDescriptor>::deserialize(deserializer)?;
        Self::new(vaults).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn groups_keep_configuration_order() {
        let registry = VaultRegistry::new(vec![
            VaultDescriptor::native("MNT", addr(1)),
            VaultDescriptor::share_based("AAPLx", 18, VaultGroup::Equity, addr(2), addr(3)),
            VaultDescriptor::share_based("USDC", 6, VaultGroup::Stable, addr(4), addr(5)),
        ])
        .unwrap();

        let stable: Vec<_> = registry
            .group(VaultGroup::Stable)
            .into_iter()
            .map(|v| v.symbol)
            .collect();
        assert_eq!(stable, vec!["MNT", "USDC"]);
        assert_eq!(registry.get("AAPLx").unwrap().asset_class(), AssetClass::Equity);
        assert_eq!(registry.get("MNT").unwrap().asset_class(), AssetClass::Native);
    }

    #[test]
    fn rejects_duplicate_symbols() {
        let err = VaultRegistry::new(vec![
            VaultDescriptor::native("MNT", addr(1)),
            VaultDescriptor::native("MNT", addr(2)),
        ])
        .unwrap_err();
        assert!(matches!(err, VaultError::InvalidConfig(_)));
    }

    #[test]
    fn enforces_token_address_invariant() {
        let mut native = VaultDescriptor::native("MNT", addr(1));
        native.token_address = Some(addr(9));
        assert!(VaultRegistry::new(vec![native]).is_err());

        let mut shares = VaultDescriptor::share_based("DAI", 18, VaultGroup::Stable, addr(2), addr(3));
        shares.token_address = None;
        assert!(VaultRegistry::new(vec![shares]).is_err());

        let mut odd = VaultDescriptor::native("MNT", addr(1));
        odd.decimals = 6;
        assert!(VaultRegistry::new(vec![odd]).is_err());
    }

    #[test]
    fn deserializes_with_validation() {
        let json = r#"[
            {"symbol":"MNT","decimals":18,"accounting":"directBalance","group":"stable",
             "vaultAddress":"0x58468524C30935d9C483f3c9B37AB33e911D3757"},
            {"symbol":"USDC","decimals":6,"accounting":"shareBased","group":"stable",
             "tokenAddress":"0x9efed651f02dB27E173B4aed4697dd774571D9f3",
             "vaultAddress":"0x5A870E83F8d9bdB093D387A5d632F92E402ABCaC"}
        ]"#;
        let registry: VaultRegistry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("USDC").unwrap().decimals, 6);

        let bad = r#"[{"symbol":"USDC","decimals":6,"accounting":"shareBased","group":"stable",
             "vaultAddress":"0x5A870E83F8d9bdB093D387A5d632F92E402ABCaC"}]"#;
        assert!(serde_json::from_str::<VaultRegistry>(bad).is_err());
    }
}
