//! Error types shared by every component of the engine.
//!
//! Errors fall into four groups:
//! - **Validation** errors are raised before any chain call and shown inline
//!   next to the action that triggered them.
//! - **Configuration** errors are fatal at startup and name the offending key.
//! - **Chain** errors come from the RPC transport, a reverted transaction or a
//!   rejected signature. They are recovered at the operation boundary.
//! - **Cache** errors only cover store I/O. Unparsable cached content is a
//!   cache miss, never an error.

use alloy::primitives::TxHash;

/// Errors produced by the vault engine.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------
    /// The amount field was empty.
    #[error("enter an amount")]
    EmptyAmount,

    /// The amount could not be parsed, was not positive, or resolves to zero
    /// shares.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The account identifier is not a well-formed address.
    #[error("invalid account: {0}")]
    InvalidAccount(String),

    /// No vault or faucet token with this symbol is registered.
    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    /// An action for this vault or token is already in flight.
    #[error("{0} already has a pending transaction")]
    Busy(String),

    /// No account is connected.
    #[error("no account connected")]
    NotConnected,

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------
    /// A required configuration key is missing.
    #[error("missing configuration key `{0}`")]
    MissingConfig(String),

    /// A configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ------------------------------------------------------------------
    // Chain
    // ------------------------------------------------------------------
    /// Generic RPC failure reported by a chain backend.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// A contract call failed (revert on `eth_call`, ABI decode error, ...).
    #[error(transparent)]
    Contract(#[from] alloy::contract::Error),

    /// The transport failed before reaching the contract.
    #[error(transparent)]
    Transport(#[from] alloy::transports::TransportError),

    /// A submitted transaction could not be awaited.
    #[error(transparent)]
    PendingTransaction(#[from] alloy::providers::PendingTransactionError),

    /// The transaction was mined but its receipt reports failure.
    #[error("transaction {0} reverted")]
    Reverted(TxHash),

    // ------------------------------------------------------------------
    // Numeric / cache
    // ------------------------------------------------------------------
    /// A raw on-chain amount does not fit the decimal representation.
    #[error("amount out of range")]
    AmountOverflow,

    /// The history store could not be read or written.
    #[error("cache error: {0}")]
    Cache(String),
}

impl VaultError {
    /// True for errors raised before any chain call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyAmount
                | Self::InvalidAmount(_)
                | Self::InvalidAccount(_)
                | Self::UnknownAsset(_)
                | Self::Busy(_)
                | Self::NotConnected
        )
    }
}

/// Convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, VaultError>;
