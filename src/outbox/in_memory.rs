use super::{log_appended, OutboxStore, PageCursor, PendingPage};
use crate::{Clock, NewOutboxEntry, OutboxEntry, OutboxState, Result, SystemClock};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Outbox table held in a concurrent map. Conditional updates run under the
/// entry's shard write lock.
///
/// There is no ordered index: every `pending_page` call copies and sorts the
/// due rows, so a full pass costs O(n² / page_size). Meant for tests and
/// small single-process setups; `RocksDbOutboxStore` keeps a real index.
#[derive(Clone)]
pub struct InMemoryOutboxStore {
    entries: Arc<DashMap<String, OutboxEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_in_state(&self, state: OutboxState) -> Vec<OutboxEntry> {
        self.entries
            .iter()
            .filter(|e| e.state == state)
            .map(|e| e.value().clone())
            .collect()
    }

    fn update<F>(&self, id: &str, change: F) -> Result<bool>
    where
        F: FnOnce(&mut OutboxEntry) -> bool,
    {
        match self.entries.get_mut(id) {
            Some(mut entry) => Ok(change(&mut entry)),
            None => Ok(false),
        }
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn append(&self, entry: NewOutboxEntry) -> Result<String> {
        entry.validate()?;
        let entry = OutboxEntry::from_new(entry, self.clock.now());
        let id = entry.id.clone();
        log_appended(&entry);
        self.entries.insert(id.clone(), entry);
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Option<OutboxEntry>> {
        Ok(self.entries.get(id).map(|e| e.value().clone()))
    }

    fn pending_page(
        &self,
        cursor: Option<&PageCursor>,
        page_size: usize,
        now: DateTime<Utc>,
    ) -> Result<PendingPage> {
        let mut due: Vec<(String, OutboxEntry)> = self
            .entries
            .iter()
            .filter(|e| e.is_due(now))
            .map(|e| (e.sort_key(), e.value().clone()))
            .filter(|(key, _)| cursor.map_or(true, |c| key.as_str() > c.0.as_str()))
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0));

        let more = due.len() > page_size;
        due.truncate(page_size);
        let next = if more {
            due.last().map(|(key, _)| PageCursor(key.clone()))
        } else {
            None
        };

        Ok(PendingPage {
            entries: due.into_iter().map(|(_, e)| e).collect(),
            next,
        })
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
        Ok(self.entries.iter().filter(|e| e.is_pending()).count())
    }
}
