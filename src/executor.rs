//! Transfer execution
//!
//! Validates and atomically commits a single transfer. Preconditions that
//! need no storage (amount, service account, self transfer) fail before any
//! read. Existence and funds are checked against one snapshot covering both
//! accounts, and the commit claims the source's current `next_index`. Losing
//! the index race restarts validation from a fresh snapshot: the losing
//! request's funds check may itself be stale, so blindly bumping the index
//! would reintroduce the double-spend it exists to prevent.

use crate::{
    config::RetryConfig,
    error::{Error, Result},
    metrics::Metrics,
    resolver::BalanceResolver,
    storage::Storage,
    types::AccountId,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;

/// Validates and commits transfers
#[derive(Clone)]
pub struct TransferExecutor {
    storage: Arc<Storage>,
    resolver: BalanceResolver,
    retry: RetryConfig,
    metrics: Metrics,
}

impl TransferExecutor {
    /// Create an executor over a store
    pub fn new(
        storage: Arc<Storage>,
        resolver: BalanceResolver,
        retry: RetryConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            resolver,
            retry,
            metrics,
        }
    }

    /// Execute one transfer.
    ///
    /// On success the transfer is durably committed; no balances are
    /// returned, the caller is told "committed" and nothing more. Conflicts
    /// are retried internally up to the configured bound, then surface as
    /// [`Error::RetriesExhausted`].
    pub async fn execute(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<()> {
        // Pure precondition checks, rejected before touching storage
        if amount <= Decimal::ZERO {
            self.metrics.transfers_rejected_total.inc();
            return Err(Error::InvalidAmount);
        }
        if source.is_service() {
            self.metrics.transfers_rejected_total.inc();
            return Err(Error::ServiceAccountAsSource);
        }
        if source == destination {
            self.metrics.transfers_rejected_total.inc();
            return Err(Error::SelfTransfer);
        }

        let start = Instant::now();

        for attempt in 0..self.retry.max_attempts {
            match self.try_commit(source, destination, amount) {
                Ok(()) => {
                    self.metrics.transfers_total.inc();
                    self.metrics
                        .transfer_duration
                        .observe(start.elapsed().as_secs_f64());
                    return Ok(());
                }
                Err(err) if err.is_conflict() => {
                    self.metrics.transfer_conflicts_total.inc();
                    tracing::debug!(
                        %source,
                        %destination,
                        attempt,
                        "index race lost, revalidating from a fresh snapshot"
                    );
                    if let Some(backoff) = self.backoff_after(attempt) {
                        tokio::time::sleep(backoff).await;
                    }
                }
                Err(err) => {
                    if err.is_client_error() {
                        self.metrics.transfers_rejected_total.inc();
                    }
                    return Err(err);
                }
            }
        }

        tracing::warn!(
            %source,
            %destination,
            attempts = self.retry.max_attempts,
            "transfer retries exhausted under contention"
        );
        Err(Error::RetriesExhausted(self.retry.max_attempts))
    }

    /// Linear backoff before the next attempt, `None` when `attempt` was the
    /// last one and the caller is about to give up anyway
    fn backoff_after(&self, attempt: u32) -> Option<Duration> {
        (attempt + 1 < self.retry.max_attempts)
            .then(|| Duration::from_millis(self.retry.backoff_ms * u64::from(attempt + 1)))
    }

    /// One validation pass and commit attempt against a fresh snapshot
    fn try_commit(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<()> {
        // Both accounts in one snapshot; two sequential reads would admit a
        // concurrent transfer landing in between
        let summaries = self.resolver.summaries(&[source, destination])?;

        if !summaries.contains_key(&destination) {
            return Err(Error::DestinationNotFound);
        }
        let source_summary = summaries.get(&source).ok_or(Error::SourceNotFound)?;

        if source_summary.balance < amount {
            return Err(Error::InsufficientFunds);
        }

        self.storage
            .append_transfer(source, source_summary.next_index, destination, amount)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SERVICE_ACCOUNT_ID;
    use crate::Config;
    use tempfile::TempDir;

    fn test_executor() -> (TransferExecutor, Arc<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        let executor = TransferExecutor::new(
            storage.clone(),
            BalanceResolver::new(storage.clone()),
            config.retry,
            Metrics::new().unwrap(),
        );
        (executor, storage, temp_dir)
    }

    #[tokio::test]
    async fn test_preconditions_fail_fast() {
        let (executor, storage, _temp) = test_executor();
        let a = AccountId::generate();
        let b = AccountId::generate();
        storage.create_account_with_seed(a, Decimal::from(100)).unwrap();
        storage.create_account(b).unwrap();

        let err = executor.execute(a, b, Decimal::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAmount));

        let err = executor.execute(a, b, Decimal::from(-3)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAmount));

        let err = executor
            .execute(SERVICE_ACCOUNT_ID, b, Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceAccountAsSource));

        let err = executor.execute(a, a, Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, Error::SelfTransfer));

        // Nothing was committed
        assert!(storage.outgoing_transfers(a).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_accounts_detected_in_snapshot() {
        let (executor, storage, _temp) = test_executor();
        let a = AccountId::generate();
        let ghost = AccountId::generate();
        storage.create_account_with_seed(a, Decimal::from(100)).unwrap();

        let err = executor.execute(a, ghost, Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, Error::DestinationNotFound));

        let err = executor.execute(ghost, a, Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, Error::SourceNotFound));
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_no_record() {
        let (executor, storage, _temp) = test_executor();
        let a = AccountId::generate();
        let b = AccountId::generate();
        storage.create_account_with_seed(a, Decimal::from(100)).unwrap();
        storage.create_account(b).unwrap();

        let err = executor.execute(a, b, Decimal::from(101)).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds));
        assert!(storage.outgoing_transfers(a).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_commit_budget_is_transient_and_commits_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        // No commit attempts at all: even a valid transfer must exhaust
        config.retry.max_attempts = 0;
        let storage = Arc::new(Storage::open(&config).unwrap());
        let executor = TransferExecutor::new(
            storage.clone(),
            BalanceResolver::new(storage.clone()),
            config.retry,
            Metrics::new().unwrap(),
        );

        let a = AccountId::generate();
        let b = AccountId::generate();
        storage.create_account_with_seed(a, Decimal::from(100)).unwrap();
        storage.create_account(b).unwrap();

        let err = executor.execute(a, b, Decimal::from(10)).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted(0)));
        assert!(!err.is_client_error());
        assert!(storage.outgoing_transfers(a).unwrap().is_empty());
    }

    #[test]
    fn test_no_backoff_after_final_attempt() {
        let (executor, _storage, _temp) = test_executor();
        // Default policy: 8 attempts, 2ms base, growing linearly
        assert_eq!(executor.backoff_after(0), Some(Duration::from_millis(2)));
        assert_eq!(executor.backoff_after(6), Some(Duration::from_millis(14)));
        assert_eq!(executor.backoff_after(7), None);
    }

    #[tokio::test]
    async fn test_sequential_transfers_use_gapless_indices() {
        let (executor, storage, _temp) = test_executor();
        let a = AccountId::generate();
        let b = AccountId::generate();
        storage.create_account_with_seed(a, Decimal::from(100)).unwrap();
        storage.create_account(b).unwrap();

        for _ in 0..4 {
            executor.execute(a, b, Decimal::from(10)).await.unwrap();
        }

        let outgoing = storage.outgoing_transfers(a).unwrap();
        assert_eq!(
            outgoing.iter().map(|t| t.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }
}
