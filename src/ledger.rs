//! Main ledger orchestration layer
//!
//! Ties the store, resolver, executor and provisioner together into the
//! high-level API the HTTP boundary consumes.
//!
//! # Example
//!
//! ```no_run
//! use transfer_ledger::{AccountId, Config, Ledger};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> transfer_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!
//!     let alice = AccountId::generate();
//!     let bob = AccountId::generate();
//!     ledger.create_account(alice, Decimal::from(100)).await?;
//!     ledger.create_account(bob, Decimal::ZERO).await?;
//!     ledger.transfer(alice, bob, Decimal::from(30)).await?;
//!
//!     assert_eq!(ledger.balance(alice).await?, Decimal::from(70));
//!     Ok(())
//! }
//! ```

use crate::{
    error::Result,
    executor::TransferExecutor,
    metrics::Metrics,
    provisioner::AccountProvisioner,
    resolver::BalanceResolver,
    storage::Storage,
    types::AccountId,
    Config,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Main ledger interface
pub struct Ledger {
    storage: Arc<Storage>,
    resolver: BalanceResolver,
    executor: TransferExecutor,
    provisioner: AccountProvisioner,
    metrics: Metrics,
}

impl Ledger {
    /// Open the ledger with the given configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::default();
        let resolver = BalanceResolver::new(storage.clone());
        let executor = TransferExecutor::new(
            storage.clone(),
            resolver.clone(),
            config.retry.clone(),
            metrics.clone(),
        );
        let provisioner = AccountProvisioner::new(storage.clone(), metrics.clone());

        Ok(Self {
            storage,
            resolver,
            executor,
            provisioner,
            metrics,
        })
    }

    /// Create an account, seeding a positive initial balance from the
    /// service account
    pub async fn create_account(&self, id: AccountId, initial_balance: Decimal) -> Result<()> {
        self.provisioner.provision(id, initial_balance)?;
        Ok(())
    }

    /// Current balance of an account
    pub async fn balance(&self, id: AccountId) -> Result<Decimal> {
        self.resolver.balance(id)
    }

    /// Transfer `amount` from `source` to `destination`
    pub async fn transfer(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<()> {
        self.executor.execute(source, destination, amount).await
    }

    /// Metrics collector for this ledger instance
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Resolver, exposed for audit and verification paths
    pub fn resolver(&self) -> &BalanceResolver {
        &self.resolver
    }

    /// Shut the ledger down, closing the store
    pub fn shutdown(self) -> Result<()> {
        let Self {
            storage,
            resolver,
            executor,
            provisioner,
            metrics,
        } = self;
        // The components hold store handles of their own; release them so
        // the close below operates on the last one
        drop((resolver, executor, provisioner, metrics));

        match Arc::try_unwrap(storage) {
            Ok(storage) => storage.close(),
            Err(_) => {
                // Another handle still holds the store; it closes on drop
                Ok(())
            }
        }
    }
}
