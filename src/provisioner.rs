//! Account provisioning
//!
//! Creates accounts and funds them via a seed transfer from the service
//! account, keeping the sum of all balances at exactly zero. The account row
//! and its seed transfer commit in a single atomic unit: a crash can never
//! leave a funded account without the transfer that funded it.

use crate::{
    error::{Error, Result},
    metrics::Metrics,
    storage::Storage,
    types::AccountId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Creates and seeds accounts
#[derive(Clone)]
pub struct AccountProvisioner {
    storage: Arc<Storage>,
    metrics: Metrics,
}

impl AccountProvisioner {
    /// Create a provisioner over a store
    pub fn new(storage: Arc<Storage>, metrics: Metrics) -> Self {
        Self { storage, metrics }
    }

    /// Create `id` with the given initial balance.
    ///
    /// A zero balance creates the account with no transfer; a positive one
    /// records the balance as a transfer from the service account.
    pub fn provision(&self, id: AccountId, initial_balance: Decimal) -> Result<DateTime<Utc>> {
        if initial_balance < Decimal::ZERO {
            return Err(Error::NegativeBalance);
        }

        // The service identifier is reserved and pre-seeded at open
        if id.is_service() {
            return Err(Error::AlreadyExists);
        }

        let created_at = if initial_balance.is_zero() {
            self.storage.create_account(id)?
        } else {
            self.storage.create_account_with_seed(id, initial_balance)?
        };

        self.metrics.accounts_created_total.inc();
        tracing::info!(account = %id, balance = %initial_balance, "account provisioned");
        Ok(created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::BalanceResolver;
    use crate::types::SERVICE_ACCOUNT_ID;
    use crate::Config;
    use tempfile::TempDir;

    fn test_provisioner() -> (AccountProvisioner, BalanceResolver, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        (
            AccountProvisioner::new(storage.clone(), Metrics::new().unwrap()),
            BalanceResolver::new(storage),
            temp_dir,
        )
    }

    #[test]
    fn test_provision_zero_balance_creates_no_transfer() {
        let (provisioner, resolver, _temp) = test_provisioner();
        let id = AccountId::generate();

        provisioner.provision(id, Decimal::ZERO).unwrap();

        assert_eq!(resolver.balance(id).unwrap(), Decimal::ZERO);
        assert_eq!(resolver.balance(SERVICE_ACCOUNT_ID).unwrap(), Decimal::ZERO);
        let summary = resolver.summary(SERVICE_ACCOUNT_ID).unwrap().unwrap();
        assert_eq!(summary.next_index, 0);
    }

    #[test]
    fn test_provision_funded_account() {
        let (provisioner, resolver, _temp) = test_provisioner();
        let id = AccountId::generate();

        provisioner.provision(id, Decimal::from(250)).unwrap();

        assert_eq!(resolver.balance(id).unwrap(), Decimal::from(250));
        assert_eq!(
            resolver.balance(SERVICE_ACCOUNT_ID).unwrap(),
            Decimal::from(-250)
        );
        assert_eq!(resolver.total_balance().unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_provision_negative_balance_rejected() {
        let (provisioner, resolver, _temp) = test_provisioner();
        let id = AccountId::generate();

        let err = provisioner.provision(id, Decimal::from(-1)).unwrap_err();
        assert!(matches!(err, Error::NegativeBalance));
        assert!(resolver.summary(id).unwrap().is_none());
    }

    #[test]
    fn test_provision_duplicate_keeps_original_balance() {
        let (provisioner, resolver, _temp) = test_provisioner();
        let id = AccountId::generate();

        provisioner.provision(id, Decimal::from(100)).unwrap();
        let err = provisioner.provision(id, Decimal::from(999)).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
        assert_eq!(resolver.balance(id).unwrap(), Decimal::from(100));
    }

    #[test]
    fn test_service_identifier_is_reserved() {
        let (provisioner, _resolver, _temp) = test_provisioner();
        let err = provisioner
            .provision(SERVICE_ACCOUNT_ID, Decimal::ZERO)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
    }
}
