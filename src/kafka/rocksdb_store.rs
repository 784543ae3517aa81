use crate::{PurchaseError, Result};
use rocksdb::{
    Direction, ErrorKind, IteratorMode, Options, Transaction, TransactionDB, TransactionDBOptions,
};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Commits that hit lock contention are replayed this many times.
const MAX_TXN_RETRIES: u32 = 5;

/// RocksDB-backed state store shared by the seat lock and the outbox table.
/// Every conditional mutation runs inside a pessimistic transaction.
pub struct RocksDBStore {
    db: TransactionDB,
}

impl RocksDBStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(10000);
        opts.set_use_fsync(false);
        opts.set_bytes_per_sync(8388608);
        opts.set_max_write_buffer_number(4);
        opts.set_write_buffer_size(64 * 1024 * 1024);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(1_000);

        let db: TransactionDB = TransactionDB::open(&opts, &txn_opts, path)?;
        Ok(Self { db })
    }

    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self.db.get(key)? {
            Some(value) => {
                let deserialized: T = serde_json::from_slice(&value)?;
                Ok(Some(deserialized))
            }
            None => Ok(None),
        }
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.db.delete(key)?;
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.db.get(key)?.is_some())
    }

    /// Keys under `prefix` strictly after `after` (or from the start of the
    /// prefix), in key order, at most `limit` of them.
    pub fn scan_keys(&self, prefix: &str, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
        let start = after.unwrap_or(prefix);
        let mut keys = Vec::new();

        for item in self.db.iterator(IteratorMode::From(start.as_bytes(), Direction::Forward)) {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8_lossy(&key).into_owned();
            if Some(key.as_str()) == after {
                continue;
            }
            keys.push(key);
            if keys.len() >= limit {
                break;
            }
        }

        Ok(keys)
    }

    /// Number of keys under `prefix`, counted while iterating.
    pub fn count_keys(&self, prefix: &str) -> Result<usize> {
        let mut count = 0;
        for item in self.db.iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward)) {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Runs `op` inside a transaction and commits it. Uncommitted work is
    /// rolled back when the transaction drops. Lock timeouts and busy errors
    /// replay the whole operation.
    pub fn transact<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_, TransactionDB>) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            let txn = self.db.transaction();
            let outcome = op(&txn).and_then(|value| {
                txn.commit()?;
                Ok(value)
            });

            match outcome {
                Err(PurchaseError::RocksDB(ref e)) if is_contention(e) && attempt < MAX_TXN_RETRIES => {
                    attempt += 1;
                    debug!("Transaction contention ({}), replaying attempt {}", e, attempt);
                }
                other => return other,
            }
        }
    }
}

fn is_contention(e: &rocksdb::Error) -> bool {
    matches!(e.kind(), ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain)
}

/// Reads and decodes a JSON value while holding its row lock.
pub fn get_for_update<T>(txn: &Transaction<'_, TransactionDB>, key: &str) -> Result<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    match txn.get_for_update(key, true)? {
        Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
        None => Ok(None),
    }
}
