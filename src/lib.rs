//! Transfer Ledger
//!
//! Zero-sum account ledger over an append-only transfer log.
//!
//! # Architecture
//!
//! - **Derived balances**: balance is a fold over the immutable log, with a
//!   per-account summary row maintained in the same atomic commit as every
//!   append, never updated independently
//! - **Optimistic concurrency**: concurrent writers race for a gapless
//!   per-source index; exactly one wins a given index, losers re-validate
//!   against a fresh snapshot
//! - **Zero-sum anchor**: a reserved service account funds new accounts, so
//!   the sum of all balances (service account included) is always exactly 0
//!
//! # Invariants
//!
//! - Non-service balances never go negative after any committed transfer
//! - Σ(balances) == 0 at every quiescent point
//! - Per-source indices form the gapless sequence 0,1,2,… in commit order
//! - Transfers are append-only, never updated or deleted

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod metrics;
pub mod provisioner;
pub mod resolver;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use types::{AccountId, AccountSummary, Transfer, SERVICE_ACCOUNT_ID};
