//! Durable staging of domain events awaiting broker delivery.
//!
//! Entries move `PENDING -> SENT` or `PENDING -> DEAD` and never change
//! again afterwards. Every transition is a conditional single-row update,
//! so several relay workers can drain one table without coordination.

mod in_memory;
mod relay;
mod rocksdb_outbox;

pub use in_memory::InMemoryOutboxStore;
pub use relay::{OutboxRelay, TickReport};
pub use rocksdb_outbox::RocksDbOutboxStore;

use crate::{NewOutboxEntry, OutboxEntry, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Position after the last scanned entry of a pending scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(pub String);

#[derive(Debug, Clone, Default)]
pub struct PendingPage {
    pub entries: Vec<OutboxEntry>,
    /// `None` once the scan reached the end of the backlog.
    pub next: Option<PageCursor>,
}

pub trait OutboxStore: Send + Sync {
    /// Persists a new PENDING entry and returns its id. Once this returns
    /// the event will eventually be delivered or dead-lettered.
    fn append(&self, entry: NewOutboxEntry) -> Result<String>;

    fn get(&self, id: &str) -> Result<Option<OutboxEntry>>;

    /// Up to `page_size` due PENDING entries after `cursor`, oldest first.
    fn pending_page(
        &self,
        cursor: Option<&PageCursor>,
        page_size: usize,
        now: DateTime<Utc>,
    ) -> Result<PendingPage>;

    /// `false` means the entry already left PENDING (another worker won).
    fn mark_sent(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Increments `attempts` and sets `next_attempt_at = next_attempt(attempts)`.
    /// Terminal entries are left untouched and `false` is returned.
    fn record_retry(
        &self,
        id: &str,
        at: DateTime<Utc>,
        next_attempt: &dyn Fn(u32) -> DateTime<Utc>,
    ) -> Result<bool>;

    fn mark_dead(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Entries still PENDING, due or not.
    fn pending_count(&self) -> Result<usize>;
}

impl<'s> dyn OutboxStore + 's {
    /// Lazily paged, oldest-first view of the due backlog.
    pub fn query_pending(&self, page_size: usize, now: DateTime<Utc>) -> PendingPages<'_> {
        PendingPages {
            store: self,
            page_size: page_size.max(1),
            now,
            cursor: None,
            done: false,
        }
    }
}

pub struct PendingPages<'a> {
    store: &'a dyn OutboxStore,
    page_size: usize,
    now: DateTime<Utc>,
    cursor: Option<PageCursor>,
    done: bool,
}

impl Iterator for PendingPages<'_> {
    type Item = Result<Vec<OutboxEntry>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.store.pending_page(self.cursor.as_ref(), self.page_size, self.now) {
            Ok(page) => {
                match page.next {
                    Some(cursor) => self.cursor = Some(cursor),
                    None => self.done = true,
                }
                if page.entries.is_empty() {
                    self.done = true;
                    return None;
                }
                Some(Ok(page.entries))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn log_appended(entry: &OutboxEntry) {
    info!(
        outbox_id = %entry.id,
        event_type = %entry.event_type,
        aggregate_id = ?entry.aggregate_id,
        payload_len = entry.payload.len(),
        "Outbox event saved"
    );
    debug!(outbox_id = %entry.id, payload = %entry.payload, "Outbox event payload");
}
