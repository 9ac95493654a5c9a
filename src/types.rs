//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode for persisted rows)
//! - Exact arithmetic (Decimal for money)
//! - Derived state (balances are computed from the transfer log, never stored
//!   independently of it)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier (UUID)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(Uuid);

/// The reserved service account (all-zero UUID).
///
/// It seeds new accounts' initial balances and anchors the zero-sum
/// invariant: its balance is the negated sum of all user balances, so the
/// total over every account is exactly zero at all times. It is the only
/// account allowed to go negative.
pub const SERVICE_ACCOUNT_ID: AccountId = AccountId(Uuid::nil());

impl AccountId {
    /// Create from a UUID
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Raw 16-byte representation (used for storage keys)
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Reconstruct from raw key bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Whether this is the reserved service account
    pub fn is_service(&self) -> bool {
        *self == SERVICE_ACCOUNT_ID
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable transfer record.
///
/// `index` is 0-based and unique per `source`; together `(source, index)`
/// form the primary key of the append-only log and the optimistic-concurrency
/// version token for the source account's outgoing sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    /// Account the funds leave
    pub source: AccountId,

    /// Position in the source account's outgoing sequence (gapless, 0-based)
    pub index: u64,

    /// Account the funds arrive at
    pub destination: AccountId,

    /// Transferred amount (strictly positive, exact decimal)
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

/// Per-account summary maintained transactionally with every append.
///
/// This is the accelerating structure for balance resolution; it is only
/// ever written inside the same atomic batch as the transfer that changes
/// it, so it can never drift from the log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Current balance: Σ incoming − Σ outgoing
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,

    /// Index the next outgoing transfer must use
    pub next_index: u64,
}

impl AccountSummary {
    /// Summary of a freshly created account with no transfers
    pub fn zero() -> Self {
        Self {
            balance: Decimal::ZERO,
            next_index: 0,
        }
    }

    /// Summary after an outgoing transfer of `amount`
    pub fn debited(&self, amount: Decimal) -> Self {
        Self {
            balance: self.balance - amount,
            next_index: self.next_index + 1,
        }
    }

    /// Summary after an incoming transfer of `amount`
    pub fn credited(&self, amount: Decimal) -> Self {
        Self {
            balance: self.balance + amount,
            next_index: self.next_index,
        }
    }
}

impl Default for AccountSummary {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_account_is_nil_uuid() {
        assert!(SERVICE_ACCOUNT_ID.is_service());
        assert_eq!(SERVICE_ACCOUNT_ID.as_uuid(), Uuid::nil());
        assert!(!AccountId::generate().is_service());
    }

    #[test]
    fn test_summary_debit_credit() {
        let summary = AccountSummary::zero().credited(Decimal::from(100));
        assert_eq!(summary.balance, Decimal::from(100));
        assert_eq!(summary.next_index, 0);

        let summary = summary.debited(Decimal::from(30));
        assert_eq!(summary.balance, Decimal::from(70));
        assert_eq!(summary.next_index, 1);
    }

    #[test]
    fn test_transfer_bincode_round_trip() {
        let transfer = Transfer {
            source: AccountId::generate(),
            index: 3,
            destination: AccountId::generate(),
            amount: Decimal::new(1250, 2),
            created_at: Utc::now(),
        };

        let bytes = bincode::serialize(&transfer).unwrap();
        let decoded: Transfer = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, transfer);
    }
}
