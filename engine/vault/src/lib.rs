//! # Vault Engine
//!
//! Balance reconciliation, activity indexing and yield projection for a set of
//! EVM yield vaults deployed on Mantle Sepolia.
//!
//! ## Architecture Overview
//!
//! The engine talks to two kinds of vault contracts:
//! - a **direct-balance** vault for the native currency, which keeps a plain
//!   `balances(address)` mapping denominated in MNT;
//! - **share-based** ERC-4626 vaults for stablecoins and tokenized equities,
//!   whose balances are shares convertible into the underlying token.
//!
//! Both models sit behind [`accounting::VaultAccounting`], so the components
//! above it never branch on the accounting model.
//!
//! ## Data Flow
//!
//! ```text
//! EngineConfig ──▶ VaultRegistry
//!                      │
//!       ┌──────────────┼───────────────────┐
//!       ▼              ▼                   ▼
//! BalanceReconciler  ActionExecutor    ActivityIndexer
//!  (poll + on action) (deposit/withdraw  (Deposit/Withdraw logs,
//!       │              /faucet)           chunked, cached)
//!       ▼              │                   │
//! PositionBoard ◀──────┘ refresh           ▼
//!       │                              HistoryCache ──▶ HistoryStore
//!       ▼
//! Dashboard ──▶ PositionView { deposited, YieldQuote, YieldProjection }
//! ```
//!
//! Every chain access goes through the [`chain::VaultChain`] trait;
//! [`rpc::RpcChain`] implements it over an alloy provider.
//!
//! ## Sessions
//!
//! Connecting an account issues a [`session::SessionTicket`]. Balances,
//! history and action status computed under an old ticket are discarded once
//! another account connects, so one account's data never shows up under
//! another.
//!
//! ## Failure Model
//!
//! - A vault that fails during reconciliation reads as zero; the rest of the
//!   position is still published.
//! - A vault that fails during a history scan is left out of that scan. If the
//!   whole scan fails the cached history stays in place.
//! - Action failures become a status line for that vault or token.
//!
//! # Examples
//!
//! ```ignore
//! let config = EngineConfig::from_env()?;
//! let dashboard = Dashboard::from_config(config, signer)?;
//! dashboard.connect("0x58468524C30935d9C483f3c9B37AB33e911D3757").await?;
//!
//! dashboard.set_amount("25").await;
//! dashboard.deposit("USDC").await?;
//!
//! for view in dashboard.position_views().await {
//!     println!("{} {} ({}% APY)", view.symbol, view.deposited, view.quote.apy);
//! }
//! ```

pub mod abi;
pub mod accounting;
pub mod amount;
pub mod cache;
pub mod chain;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod executor;
pub mod indexer;
pub mod reconciler;
pub mod registry;
pub mod rpc;
pub mod session;
pub mod yield_model;

pub use accounting::{accounting_for, TxKind, VaultAccounting, WithdrawAmount};
pub use cache::{FileHistoryStore, HistoryCache, HistoryStore, MemoryHistoryStore, TransactionRecord};
pub use chain::VaultChain;
pub use config::{EngineConfig, HistoryConfig};
pub use dashboard::{Dashboard, PositionView};
pub use error::{Result, VaultError};
pub use executor::{ActionExecutor, ActionStatus, ActionTarget};
pub use indexer::{ActivityIndexer, LoadState};
pub use reconciler::{AccountPosition, BalancePoller, BalanceReconciler, PositionBoard};
pub use registry::{AccountingModel, TokenDescriptor, VaultDescriptor, VaultGroup, VaultRegistry};
pub use rpc::RpcChain;
pub use session::{AccountKey, SessionGuard, SessionTicket};
pub use yield_model::{get_apy, YieldQuote};

#[cfg(test)]
mod testutils;
