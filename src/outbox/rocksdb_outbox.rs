use super::{log_appended, OutboxStore, PageCursor, PendingPage};
use crate::{
    get_for_update, outbox_entry_key, outbox_pending_key, Clock, Keys, NewOutboxEntry, OutboxEntry,
    OutboxState, Result, RocksDBStore, SystemClock,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

/// Outbox table in RocksDB.
///
/// Rows live under `outbox:entry:{id}`. While a row is PENDING it also has a
/// key in the `outbox:pending:{createdAt}:{id}` index, which is what the
/// oldest-first scan walks. A terminal transition rewrites the row and drops
/// its index key in the same transaction.
#[derive(Clone)]
pub struct RocksDbOutboxStore {
    store: Arc<RocksDBStore>,
    clock: Arc<dyn Clock>,
}

impl RocksDbOutboxStore {
    pub fn new(store: Arc<RocksDBStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<RocksDBStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Applies `change` to the row under its row lock and writes it back when
    /// `change` reports a transition.
    fn update<F>(&self, id: &str, mut change: F) -> Result<bool>
    where
        F: FnMut(&mut OutboxEntry) -> bool,
    {
        let key = outbox_entry_key(id);
        self.store.transact(|txn| {
            let Some(mut entry) = get_for_update::<OutboxEntry>(txn, &key)? else {
                return Ok(false);
            };
            if !change(&mut entry) {
                return Ok(false);
            }

            txn.put(&key, serde_json::to_vec(&entry)?)?;
            if entry.state.is_terminal() {
                txn.delete(outbox_pending_key(entry.created_at, &entry.id))?;
            }
            Ok(true)
        })
    }
}

impl OutboxStore for RocksDbOutboxStore {
    fn append(&self, entry: NewOutboxEntry) -> Result<String> {
        entry.validate()?;
        let entry = OutboxEntry::from_new(entry, self.clock.now());
        let row = serde_json::to_vec(&entry)?;
        let entry_key = outbox_entry_key(&entry.id);
        let index_key = outbox_pending_key(entry.created_at, &entry.id);

        self.store.transact(|txn| {
            txn.put(&entry_key, &row)?;
            txn.put(&index_key, entry.id.as_bytes())?;
            Ok(())
        })?;

        log_appended(&entry);
        Ok(entry.id)
    }

    fn get(&self, id: &str) -> Result<Option<OutboxEntry>> {
        self.store.get(&outbox_entry_key(id))
    }

    fn pending_page(
        &self,
        cursor: Option<&PageCursor>,
        page_size: usize,
        now: DateTime<Utc>,
    ) -> Result<PendingPage> {
        let prefix = Keys::OUTBOX_PENDING_PREFIX;
        let mut after = cursor.map(|c| format!("{}{}", prefix, c.0));
        let mut entries = Vec::with_capacity(page_size);

        // Not-yet-due rows stay in the index, so keep scanning batches until
        // the page is full or the index is exhausted.
        loop {
            let keys = self.store.scan_keys(prefix, after.as_deref(), page_size)?;
            let exhausted = keys.len() < page_size;

            for index_key in &keys {
                after = Some(index_key.clone());
                let id = index_key.rsplit(':').next().unwrap_or_default();
                match self.get(id)? {
                    Some(entry) if entry.is_due(now) => entries.push(entry),
                    Some(_) => {}
                    None => warn!("Dangling outbox index key {}", index_key),
                }
                if entries.len() >= page_size {
                    break;
                }
            }

            if entries.len() >= page_size {
                let next = after.map(|key| PageCursor(key[prefix.len()..].to_string()));
                return Ok(PendingPage { entries, next });
            }
            if exhausted {
                return Ok(PendingPage { entries, next: None });
            }
        }
    }

    fn mark_sent(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.update(id, |entry| entry.finish(OutboxState::Sent, at))
    }

    fn record_retry(
        &self,
        id: &str,
        at: DateTime<Utc>,
        next_attempt: &dyn Fn(u32) -> DateTime<Utc>,
    ) -> Result<bool> {
        self.update(id, |entry| entry.schedule_retry(at, next_attempt))
    }

    fn mark_dead(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.update(id, |entry| entry.finish(OutboxState::Dead, at))
    }

    fn pending_count(&self) -> Result<usize> {
        self.store.count_keys(Keys::OUTBOX_PENDING_PREFIX)
    }
}
