//! Balance reconciliation and polling.
//!
//! ```text
//! BalancePoller ──tick──▶ cycle task ──▶ BalanceReconciler::reconcile
//!                                           │  join_all over vaults
//!                                           ▼
//!                                        PositionBoard::commit(ticket, cycle)
//!                                           │  dropped if the ticket is stale
//!                                           ▼  or a newer cycle already landed
//!                                        latest AccountPosition
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, warn};

use crate::accounting::{accounting_for, VaultAccounting};
use crate::chain::VaultChain;
use crate::registry::{VaultDescriptor, VaultRegistry};
use crate::session::{AccountKey, SessionGuard, SessionTicket};

/// Deposited amount per asset symbol, in human units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountPosition {
    pub account: AccountKey,
    pub balances: BTreeMap<String, Decimal>,
}

impl AccountPosition {
    /// Deposited amount of `symbol`, zero when the asset is not tracked.
    pub fn get(&self, symbol: &str) -> Decimal {
        self.balances.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }
}

/// Reads the deposited amount of an account across vaults.
pub struct BalanceReconciler {
    chain: Arc<dyn VaultChain>,
    registry: VaultRegistry,
}

impl BalanceReconciler {
    pub fn new(chain: Arc<dyn VaultChain>, registry: VaultRegistry) -> Self {
        Self { chain, registry }
    }

    /// Reads every vault of `vaults` concurrently.
    ///
    /// A vault whose read fails is reported as zero; the batch always
    /// completes.
    #[instrument(skip(self, vaults), fields(account = %account, vaults = vaults.len()))]
    pub async fn reconcile(&self, account: &AccountKey, vaults: &[VaultDescriptor]) -> AccountPosition {
        let owner = account.address();
        let reads = vaults.iter().map(|descriptor| {
            let vault = accounting_for(descriptor.clone());
            async move {
                let amount = read_deposited(self.chain.as_ref(), vault.as_ref(), owner).await;
                (descriptor.symbol.clone(), amount)
            }
        });

        AccountPosition {
            account: *account,
            balances: join_all(reads).await.into_iter().collect(),
        }
    }

    /// Reads every registered vault.
    pub async fn reconcile_all(&self, account: &AccountKey) -> AccountPosition {
        self.reconcile(account, self.registry.all()).await
    }

    /// Runs one cycle for `ticket` and commits it to `board`.
    ///
    /// Returns whether the result was committed.
    pub async fn refresh(&self, board: &PositionBoard, ticket: SessionTicket) -> bool {
        let cycle = board.next_cycle();
        let position = self.reconcile_all(&ticket.account).await;
        board.commit(&ticket, cycle, position).await
    }
}

async fn read_deposited(chain: &dyn VaultChain, vault: &dyn VaultAccounting, owner: Address) -> Decimal {
    let symbol = &vault.descriptor().symbol;
    match vault.deposited(chain, owner).await {
        Ok(amount) => amount,
        Err(e) => {
            warn!(%symbol, error = %e, "balance read failed, reporting zero");
            Decimal::ZERO
        }
    }
}

// ============================================================================
// POSITION BOARD
// ============================================================================

struct Committed {
    ticket: SessionTicket,
    cycle: u64,
    position: AccountPosition,
}

/// Latest committed position of the current session.
pub struct PositionBoard {
    guard: Arc<SessionGuard>,
    cycles: AtomicU64,
    latest: RwLock<Option<Committed>>,
}

impl PositionBoard {
    pub fn new(guard: Arc<SessionGuard>) -> Self {
        Self {
            guard,
            cycles: AtomicU64::new(0),
            latest: RwLock::new(None),
        }
    }

    /// Number of the next reconcile cycle.
    pub fn next_cycle(&self) -> u64 {
        self.cycles.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn is_current(&self, ticket: &SessionTicket) -> bool {
        self.guard.is_current(ticket).await
    }

    /// Publishes `position` unless `ticket` is stale or a later cycle of the
    /// same session is already published.
    pub async fn commit(&self, ticket: &SessionTicket, cycle: u64, position: AccountPosition) -> bool {
        if !self.guard.is_current(ticket).await {
            debug!(account = %ticket.account, cycle, "dropping position of a stale session");
            return false;
        }

        let mut latest = self.latest.write().await;
        if let Some(committed) = latest.as_ref() {
            if committed.ticket == *ticket && committed.cycle > cycle {
                debug!(cycle, newer = committed.cycle, "dropping out-of-order position");
                return false;
            }
        }
        *latest = Some(Committed {
            ticket: *ticket,
            cycle,
            position,
        });
        true
    }

    /// Position of the current session, if one was committed.
    pub async fn position(&self) -> Option<AccountPosition> {
        let current = self.guard.current().await?;
        self.latest
            .read()
            .await
            .as_ref()
            .filter(|committed| committed.ticket == current)
            .map(|committed| committed.position.clone())
    }

    pub async fn clear(&self) {
        *self.latest.write().await = None;
    }
}

// ============================================================================
// POLLER
// ============================================================================

/// Periodic reconciliation for one session.
///
/// Each tick spawns an independent cycle, so a hung read delays only its own
/// cycle. Stopping or dropping the poller aborts the loop and every cycle
/// still in flight.
pub struct BalancePoller {
    handle: JoinHandle<()>,
}

impl BalancePoller {
    pub fn spawn(
        reconciler: Arc<BalanceReconciler>,
        board: Arc<PositionBoard>,
        ticket: SessionTicket,
        period: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut cycles = JoinSet::new();

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !board.is_current(&ticket).await {
                            debug!(account = %ticket.account, "session ended, poller exiting");
                            break;
                        }
                        let reconciler = reconciler.clone();
                        let board = board.clone();
                        cycles.spawn(async move { reconciler.refresh(&board, ticket).await });
                    }
                    Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                        if let Err(e) = joined {
                            warn!(error = %e, "reconcile cycle aborted");
                        }
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for BalancePoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
