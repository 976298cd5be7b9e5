//! Account identity and session tickets.
//!
//! Every asynchronous result that ends up on screen is tagged with the
//! [`SessionTicket`] that was current when the work started. Results whose
//! ticket is no longer current (the account disconnected or switched while the
//! call was in flight) are dropped instead of committed.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::Address;
use serde::{Serialize, Serializer};
use tokio::sync::RwLock;

use crate::error::{Result, VaultError};

/// A validated account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey(Address);

impl AccountKey {
    /// Parses a hex address. Mixed-case input must carry a valid EIP-55
    /// checksum.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mixed_case = hex.chars().any(|c| c.is_ascii_uppercase())
            && hex.chars().any(|c| c.is_ascii_lowercase());

        let parsed = if mixed_case {
            Address::parse_checksummed(trimmed, None).ok()
        } else {
            Address::from_str(trimmed).ok()
        };
        parsed
            .map(Self)
            .ok_or_else(|| VaultError::InvalidAccount(raw.to_string()))
    }

    pub fn address(&self) -> Address {
        self.0
    }
}

impl From<Address> for AccountKey {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl FromStr for AccountKey {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Checksummed `0x` form.
impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for AccountKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identifies one connection of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionTicket {
    pub account: AccountKey,
    generation: u64,
}

/// Issues tickets and tracks which one is current.
#[derive(Debug, Default)]
pub struct SessionGuard {
    current: RwLock<Option<SessionTicket>>,
    generations: AtomicU64,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session for `account`, invalidating any previous ticket.
    pub async fn begin(&self, account: AccountKey) -> SessionTicket {
        let ticket = SessionTicket {
            account,
            generation: self.generations.fetch_add(1, Ordering::SeqCst) + 1,
        };
        *self.current.write().await = Some(ticket);
        ticket
    }

    /// Ends the current session.
    pub async fn end(&self) -> Option<SessionTicket> {
        self.current.write().await.take()
    }

    pub async fn current(&self) -> Option<SessionTicket> {
        *self.current.read().await
    }

    pub async fn is_current(&self, ticket: &SessionTicket) -> bool {
        self.current.read().await.as_ref() == Some(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_checks_accounts() {
        let lower = AccountKey::parse("0x58468524c30935d9c483f3c9b37ab33e911d3757").unwrap();
        let checksummed = AccountKey::parse("0x58468524C30935d9C483f3c9B37AB33e911D3757").unwrap();
        assert_eq!(lower, checksummed);
        assert_eq!(lower.to_string(), "0x58468524C30935d9C483f3c9B37AB33e911D3757");

        assert!(AccountKey::parse("0x58468524c30935D9c483f3c9b37ab33e911d3757").is_err());
        assert!(matches!(AccountKey::parse("0x1234"), Err(VaultError::InvalidAccount(_))));
        assert!(AccountKey::parse("").is_err());
    }

    #[test]
    fn serializes_checksummed() {
        let key = AccountKey::parse("0x58468524c30935d9c483f3c9b37ab33e911d3757").unwrap();
        assert_eq!(
            serde_json::to_string(&key).unwrap(),
            "\"0x58468524C30935d9C483f3c9B37AB33e911D3757\""
        );
    }

    #[tokio::test]
    async fn new_session_invalidates_old_ticket() {
        let guard = SessionGuard::new();
        let a = AccountKey::from(Address::repeat_byte(0xa));
        let b = AccountKey::from(Address::repeat_byte(0xb));

        let first = guard.begin(a).await;
        assert!(guard.is_current(&first).await);

        let second = guard.begin(b).await;
        assert!(!guard.is_current(&first).await);
        assert!(guard.is_current(&second).await);

        let again = guard.begin(a).await;
        assert_ne!(again, first);

        guard.end().await;
        assert!(!guard.is_current(&again).await);
        assert!(guard.current().await.is_none());
    }
}
