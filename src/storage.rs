//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account existence records (key: account uuid)
//! - `transfers` - Append-only transfer log (key: source uuid || index BE)
//! - `by_destination` - Secondary lookup (key: dest uuid || source uuid || index BE)
//! - `summaries` - Per-account `{balance, next_index}` rows, written only in
//!   the same atomic batch as the append that changes them
//!
//! # Concurrency
//!
//! Validation happens outside any lock, against a snapshot. The commit itself
//! takes short per-account mutexes (uuid-ordered to stay deadlock-free) only
//! across the index check and the `WriteBatch` write, so unrelated accounts
//! never queue behind each other. A commit whose index was claimed by a
//! concurrent winner observes [`Error::Conflict`] and the caller re-validates
//! from a fresh snapshot.

use crate::{
    error::{Error, Result},
    types::{AccountId, AccountSummary, Transfer, SERVICE_ACCOUNT_ID},
    Config,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options, WriteBatch, DB,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TRANSFERS: &str = "transfers";
const CF_BY_DESTINATION: &str = "by_destination";
const CF_SUMMARIES: &str = "summaries";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,

    /// Per-account commit locks; held only across the check+write of a
    /// single batch, never across request validation
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl Storage {
    /// Open or create the database, seeding the service account on first run
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the append-heavy transfer log
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_point_lookup()),
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_BY_DESTINATION, Self::cf_options_point_lookup()),
            ColumnFamilyDescriptor::new(CF_SUMMARIES, Self::cf_options_point_lookup()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let storage = Self {
            db: Arc::new(db),
            locks: DashMap::new(),
        };

        storage.seed_service_account()?;

        tracing::info!(path = %path.display(), "opened ledger store");

        Ok(storage)
    }

    // Column family options

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_point_lookup() -> Options {
        let mut opts = Options::default();
        // Frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", name)))
    }

    /// The service account must exist before any provisioning commits so
    /// that the sum of all summaries is exactly zero from the first write.
    fn seed_service_account(&self) -> Result<()> {
        if self.account_exists(SERVICE_ACCOUNT_ID)? {
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        let created_at = Utc::now();
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            SERVICE_ACCOUNT_ID.as_bytes(),
            bincode::serialize(&created_at)?,
        );
        batch.put_cf(
            self.cf(CF_SUMMARIES)?,
            SERVICE_ACCOUNT_ID.as_bytes(),
            bincode::serialize(&AccountSummary::zero())?,
        );
        self.db.write(batch)?;

        tracing::info!(account = %SERVICE_ACCOUNT_ID, "seeded service account");
        Ok(())
    }

    // Key layout

    fn transfer_key(source: AccountId, index: u64) -> [u8; 24] {
        let mut key = [0u8; 24];
        key[..16].copy_from_slice(source.as_bytes());
        key[16..].copy_from_slice(&index.to_be_bytes());
        key
    }

    fn destination_key(destination: AccountId, source: AccountId, index: u64) -> [u8; 40] {
        let mut key = [0u8; 40];
        key[..16].copy_from_slice(destination.as_bytes());
        key[16..32].copy_from_slice(source.as_bytes());
        key[32..].copy_from_slice(&index.to_be_bytes());
        key
    }

    // Locking

    fn account_lock(&self, id: AccountId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    // Account operations

    /// Whether an account row exists. No side effects.
    pub fn account_exists(&self, id: AccountId) -> Result<bool> {
        let cf = self.cf(CF_ACCOUNTS)?;
        Ok(self.db.get_cf(cf, id.as_bytes())?.is_some())
    }

    /// Create an account with no seed transfer.
    ///
    /// Serialized only against other operations on the same identifier.
    pub fn create_account(&self, id: AccountId) -> Result<DateTime<Utc>> {
        let lock = self.account_lock(id);
        let _guard = lock.lock();

        if self.account_exists(id)? {
            return Err(Error::AlreadyExists);
        }

        let created_at = Utc::now();
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            id.as_bytes(),
            bincode::serialize(&created_at)?,
        );
        batch.put_cf(
            self.cf(CF_SUMMARIES)?,
            id.as_bytes(),
            bincode::serialize(&AccountSummary::zero())?,
        );
        self.db.write(batch)?;

        tracing::debug!(account = %id, "account created");
        Ok(created_at)
    }

    /// Create an account and fund it from the service account in one atomic
    /// batch: account row, seed transfer at the service account's current
    /// `next_index`, and both summary rows commit together or not at all.
    pub fn create_account_with_seed(
        &self,
        id: AccountId,
        amount: Decimal,
    ) -> Result<DateTime<Utc>> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount);
        }
        if id.is_service() {
            return Err(Error::AlreadyExists);
        }

        // Lock the new id and the service account in uuid order
        let (first, second) = if id < SERVICE_ACCOUNT_ID {
            (id, SERVICE_ACCOUNT_ID)
        } else {
            (SERVICE_ACCOUNT_ID, id)
        };
        let lock_first = self.account_lock(first);
        let lock_second = self.account_lock(second);
        let _guard_first = lock_first.lock();
        let _guard_second = lock_second.lock();

        if self.account_exists(id)? {
            return Err(Error::AlreadyExists);
        }

        let service = self
            .summary(SERVICE_ACCOUNT_ID)?
            .ok_or(Error::SourceNotFound)?;

        let created_at = Utc::now();
        let transfer = Transfer {
            source: SERVICE_ACCOUNT_ID,
            index: service.next_index,
            destination: id,
            amount,
            created_at,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            id.as_bytes(),
            bincode::serialize(&created_at)?,
        );
        batch.put_cf(
            self.cf(CF_TRANSFERS)?,
            Self::transfer_key(SERVICE_ACCOUNT_ID, transfer.index),
            bincode::serialize(&transfer)?,
        );
        batch.put_cf(
            self.cf(CF_BY_DESTINATION)?,
            Self::destination_key(id, SERVICE_ACCOUNT_ID, transfer.index),
            b"",
        );
        batch.put_cf(
            self.cf(CF_SUMMARIES)?,
            id.as_bytes(),
            bincode::serialize(&AccountSummary {
                balance: amount,
                next_index: 0,
            })?,
        );
        // The service account is the zero-sum anchor; it may go negative
        batch.put_cf(
            self.cf(CF_SUMMARIES)?,
            SERVICE_ACCOUNT_ID.as_bytes(),
            bincode::serialize(&service.debited(amount))?,
        );
        self.db.write(batch)?;

        tracing::debug!(account = %id, %amount, "account created and seeded");
        Ok(created_at)
    }

    // Transfer operations

    /// Append one transfer atomically.
    ///
    /// `index` must equal the source's current `next_index`; anything else is
    /// a [`Error::Conflict`] (a concurrent commit won the index, or the
    /// caller validated against a stale snapshot). The transfer row, the
    /// destination index row and both summary updates land in one batch.
    pub fn append_transfer(
        &self,
        source: AccountId,
        index: u64,
        destination: AccountId,
        amount: Decimal,
    ) -> Result<DateTime<Utc>> {
        if source == destination {
            return Err(Error::SelfTransfer);
        }

        let (first, second) = if source < destination {
            (source, destination)
        } else {
            (destination, source)
        };
        let lock_first = self.account_lock(first);
        let lock_second = self.account_lock(second);
        let _guard_first = lock_first.lock();
        let _guard_second = lock_second.lock();

        let src_summary = self.summary(source)?.ok_or(Error::SourceNotFound)?;
        let dst_summary = self.summary(destination)?.ok_or(Error::DestinationNotFound)?;

        if index != src_summary.next_index {
            return Err(Error::Conflict {
                account: source,
                index,
            });
        }

        // Authoritative funds guard; the executor's snapshot check may be
        // stale by the time the commit lock is held
        if !source.is_service() && src_summary.balance < amount {
            return Err(Error::InsufficientFunds);
        }

        let created_at = Utc::now();
        let transfer = Transfer {
            source,
            index,
            destination,
            amount,
            created_at,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_TRANSFERS)?,
            Self::transfer_key(source, index),
            bincode::serialize(&transfer)?,
        );
        batch.put_cf(
            self.cf(CF_BY_DESTINATION)?,
            Self::destination_key(destination, source, index),
            b"",
        );
        batch.put_cf(
            self.cf(CF_SUMMARIES)?,
            source.as_bytes(),
            bincode::serialize(&src_summary.debited(amount))?,
        );
        batch.put_cf(
            self.cf(CF_SUMMARIES)?,
            destination.as_bytes(),
            bincode::serialize(&dst_summary.credited(amount))?,
        );
        self.db.write(batch)?;

        tracing::debug!(%source, %destination, index, %amount, "transfer appended");
        Ok(created_at)
    }

    /// Get a transfer by its `(source, index)` primary key
    pub fn get_transfer(&self, source: AccountId, index: u64) -> Result<Option<Transfer>> {
        let cf = self.cf(CF_TRANSFERS)?;
        match self.db.get_cf(cf, Self::transfer_key(source, index))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Summary operations

    fn summary(&self, id: AccountId) -> Result<Option<AccountSummary>> {
        let cf = self.cf(CF_SUMMARIES)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Read summaries for a batch of accounts at one consistent snapshot.
    ///
    /// All entries reflect the same logical point in time: a concurrent
    /// transfer between two accounts in the same batch is either visible on
    /// both sides or on neither. Missing accounts are absent from the map.
    pub fn read_accounts_summary(
        &self,
        ids: &[AccountId],
    ) -> Result<HashMap<AccountId, AccountSummary>> {
        let snapshot = self.db.snapshot();
        let cf = self.cf(CF_SUMMARIES)?;

        let mut summaries = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = snapshot.get_cf(cf, id.as_bytes())? {
                summaries.insert(*id, bincode::deserialize::<AccountSummary>(&value)?);
            }
        }

        Ok(summaries)
    }

    // Log scans (audit and recompute paths)

    /// All outgoing transfers of `source`, in index order
    pub fn outgoing_transfers(&self, source: AccountId) -> Result<Vec<Transfer>> {
        let cf = self.cf(CF_TRANSFERS)?;
        let prefix = source.as_bytes();

        let mut transfers = Vec::new();
        for item in self.db.prefix_iterator_cf(cf, prefix) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            transfers.push(bincode::deserialize::<Transfer>(&value)?);
        }

        Ok(transfers)
    }

    /// All incoming transfers of `destination`, resolved through the
    /// secondary index
    pub fn incoming_transfers(&self, destination: AccountId) -> Result<Vec<Transfer>> {
        let cf = self.cf(CF_BY_DESTINATION)?;
        let prefix = destination.as_bytes();

        let mut transfers = Vec::new();
        for item in self.db.prefix_iterator_cf(cf, prefix) {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if key.len() != 40 {
                return Err(Error::Storage(format!(
                    "malformed destination index key of length {}",
                    key.len()
                )));
            }

            let source_bytes: [u8; 16] = key[16..32].try_into().expect("checked length");
            let source = AccountId::from_bytes(source_bytes);
            let index = u64::from_be_bytes(key[32..40].try_into().expect("checked length"));

            let transfer = self
                .get_transfer(source, index)?
                .ok_or_else(|| Error::Storage(format!("dangling index row {}/{}", source, index)))?;
            transfers.push(transfer);
        }

        Ok(transfers)
    }

    /// All account identifiers, service account included
    pub fn account_ids(&self) -> Result<Vec<AccountId>> {
        let cf = self.cf(CF_ACCOUNTS)?;

        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if key.len() != 16 {
                return Err(Error::Storage(format!(
                    "malformed account key of length {}",
                    key.len()
                )));
            }
            let bytes: [u8; 16] = key.as_ref().try_into().expect("checked length");
            ids.push(AccountId::from_bytes(bytes));
        }

        Ok(ids)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("ledger store closed");
        Ok(())
    }
}
