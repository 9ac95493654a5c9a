//! Balance resolution
//!
//! Balances are derived values: `balance(A) = Σ(amount where destination=A)
//! − Σ(amount where source=A)`. The store maintains per-account summary rows
//! in the same atomic batch as every append, so the fast path is a summary
//! read; the fold over the raw log stays available for verification and is
//! the definition the summaries must always agree with.

use crate::{
    error::{Error, Result},
    storage::Storage,
    types::{AccountId, AccountSummary},
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Computes `{balance, next_index}` for accounts
#[derive(Clone)]
pub struct BalanceResolver {
    storage: Arc<Storage>,
}

impl BalanceResolver {
    /// Create a resolver over a store
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Summaries for a batch of accounts at one consistent snapshot.
    ///
    /// Fetching source and destination metadata in one call (rather than two
    /// sequential reads) closes the window where a concurrent transfer lands
    /// between the reads and the funds check runs against mixed states.
    pub fn summaries(&self, ids: &[AccountId]) -> Result<HashMap<AccountId, AccountSummary>> {
        self.storage.read_accounts_summary(ids)
    }

    /// Summary for a single account, `None` if it does not exist
    pub fn summary(&self, id: AccountId) -> Result<Option<AccountSummary>> {
        Ok(self.summaries(&[id])?.remove(&id))
    }

    /// Current balance of an account
    pub fn balance(&self, id: AccountId) -> Result<Decimal> {
        self.summary(id)?
            .map(|s| s.balance)
            .ok_or(Error::AccountNotFound)
    }

    /// Recompute a summary directly from the append-only log.
    ///
    /// `next_index` is `1 + max(index of outgoing)`, or 0 when the account
    /// has never been a source.
    pub fn recompute(&self, id: AccountId) -> Result<AccountSummary> {
        let outgoing = self.storage.outgoing_transfers(id)?;
        let incoming = self.storage.incoming_transfers(id)?;

        let debits: Decimal = outgoing.iter().map(|t| t.amount).sum();
        let credits: Decimal = incoming.iter().map(|t| t.amount).sum();
        let next_index = outgoing.iter().map(|t| t.index + 1).max().unwrap_or(0);

        Ok(AccountSummary {
            balance: credits - debits,
            next_index,
        })
    }

    /// Verify the maintained summary against the log: the recomputed values
    /// must match and the outgoing index set must be exactly `{0..n-1}`.
    pub fn verify(&self, id: AccountId) -> Result<bool> {
        let maintained = match self.summary(id)? {
            Some(summary) => summary,
            None => return Err(Error::AccountNotFound),
        };
        let recomputed = self.recompute(id)?;

        if maintained != recomputed {
            tracing::warn!(
                account = %id,
                ?maintained,
                ?recomputed,
                "summary row disagrees with transfer log"
            );
            return Ok(false);
        }

        let outgoing = self.storage.outgoing_transfers(id)?;
        let gapless = outgoing
            .iter()
            .enumerate()
            .all(|(position, transfer)| transfer.index == position as u64);

        Ok(gapless && outgoing.len() as u64 == maintained.next_index)
    }

    /// Sum of balances over every account, service account included.
    ///
    /// Must be exactly zero at any quiescent point.
    pub fn total_balance(&self) -> Result<Decimal> {
        let ids = self.storage.account_ids()?;
        let summaries = self.storage.read_accounts_summary(&ids)?;
        Ok(summaries.values().map(|s| s.balance).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SERVICE_ACCOUNT_ID;
    use crate::Config;
    use tempfile::TempDir;

    fn test_resolver() -> (BalanceResolver, Arc<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        (BalanceResolver::new(storage.clone()), storage, temp_dir)
    }

    #[test]
    fn test_balance_of_missing_account() {
        let (resolver, _storage, _temp) = test_resolver();
        let err = resolver.balance(AccountId::generate()).unwrap_err();
        assert!(matches!(err, Error::AccountNotFound));
    }

    #[test]
    fn test_recompute_matches_summary() {
        let (resolver, storage, _temp) = test_resolver();
        let a = AccountId::generate();
        let b = AccountId::generate();
        storage.create_account_with_seed(a, Decimal::from(100)).unwrap();
        storage.create_account(b).unwrap();
        storage.append_transfer(a, 0, b, Decimal::from(30)).unwrap();
        storage.append_transfer(b, 0, a, Decimal::from(5)).unwrap();

        for id in [a, b, SERVICE_ACCOUNT_ID] {
            assert_eq!(
                resolver.recompute(id).unwrap(),
                resolver.summary(id).unwrap().unwrap()
            );
            assert!(resolver.verify(id).unwrap());
        }

        assert_eq!(resolver.balance(a).unwrap(), Decimal::from(75));
        assert_eq!(resolver.balance(b).unwrap(), Decimal::from(25));
    }

    #[test]
    fn test_total_balance_is_zero() {
        let (resolver, storage, _temp) = test_resolver();
        assert_eq!(resolver.total_balance().unwrap(), Decimal::ZERO);

        let a = AccountId::generate();
        let b = AccountId::generate();
        storage.create_account_with_seed(a, Decimal::from(100)).unwrap();
        storage.create_account_with_seed(b, Decimal::from(40)).unwrap();
        storage.append_transfer(a, 0, b, Decimal::from(15)).unwrap();

        assert_eq!(resolver.total_balance().unwrap(), Decimal::ZERO);
        assert_eq!(
            resolver.balance(SERVICE_ACCOUNT_ID).unwrap(),
            Decimal::from(-140)
        );
    }
}
