#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use ticket_outbox::*;
use tokio::sync::Barrier;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> ManualClock {
    ManualClock::new(start_time())
}

pub fn test_venues() -> Arc<VenueRegistry> {
    let layout = VenueSettings {
        zone_count: 2,
        row_count: 10,
        col_count: 20,
    };
    Arc::new(
        VenueRegistry::new()
            .with_venue("V1", layout)
            .with_venue(LEGACY_VENUE_ID, layout),
    )
}

pub fn seat(row: &str, column: &str) -> SeatKey {
    SeatKey::new("E1", "V1", 1, row, column)
}

pub fn outbox_config(max_attempts: u32) -> OutboxConfig {
    OutboxConfig {
        poll_interval_ms: 10,
        page_size: 2,
        max_attempts,
        ..OutboxConfig::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOutcome {
    Ack,
    Nack,
    Error,
}

/// Broker double that records every publish and answers with a scripted outcome.
pub struct ScriptedBroker {
    outcome: Mutex<BrokerOutcome>,
    calls: AtomicUsize,
    published: Mutex<Vec<(String, String)>>,
    barrier: Option<Arc<Barrier>>,
}

impl ScriptedBroker {
    pub fn new(outcome: BrokerOutcome) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            barrier: None,
        }
    }

    /// Every publish waits until `parties` publishes are in flight.
    pub fn with_barrier(mut self, parties: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    pub fn set_outcome(&self, outcome: BrokerOutcome) {
        *self.outcome.lock() = outcome;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Takes one of the barrier's slots from outside the broker.
    pub async fn join_barrier(&self) {
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
    }

    /// `(routing_key, payload)` per publish call.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl BrokerPublisher for ScriptedBroker {
    async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.published.lock().push((
            routing_key.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        ));

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }

        let outcome = *self.outcome.lock();
        match outcome {
            BrokerOutcome::Ack => Ok(true),
            BrokerOutcome::Nack => Ok(false),
            BrokerOutcome::Error => Err(PurchaseError::PublishRejected(
                "broker unreachable".to_string(),
            )),
        }
    }
}

/// Outbox whose appends always fail.
#[derive(Default)]
pub struct FailingOutboxStore;

impl OutboxStore for FailingOutboxStore {
    fn append(&self, _entry: NewOutboxEntry) -> Result<String> {
        Err(PurchaseError::StoreUnavailable("outbox table offline".to_string()))
    }

    fn get(&self, _id: &str) -> Result<Option<OutboxEntry>> {
        Ok(None)
    }

    fn pending_page(
        &self,
        _cursor: Option<&PageCursor>,
        _page_size: usize,
        _now: DateTime<Utc>,
    ) -> Result<PendingPage> {
        Ok(PendingPage::default())
    }

    fn mark_sent(&self, _id: &str, _at: DateTime<Utc>) -> Result<bool> {
        Ok(false)
    }

    fn record_retry(
        &self,
        _id: &str,
        _at: DateTime<Utc>,
        _next_attempt: &dyn Fn(u32) -> DateTime<Utc>,
    ) -> Result<bool> {
        Ok(false)
    }

    fn mark_dead(&self, _id: &str, _at: DateTime<Utc>) -> Result<bool> {
        Ok(false)
    }

    fn pending_count(&self) -> Result<usize> {
        Ok(0)
    }
}

/// In-memory outbox whose state transitions fail for chosen entries.
pub struct FlakyOutboxStore {
    inner: InMemoryOutboxStore,
    broken: Mutex<HashSet<String>>,
}

impl FlakyOutboxStore {
    pub fn new(inner: InMemoryOutboxStore) -> Self {
        Self {
            inner,
            broken: Mutex::new(HashSet::new()),
        }
    }

    pub fn break_entry(&self, id: &str) {
        self.broken.lock().insert(id.to_string());
    }

    fn check(&self, id: &str) -> Result<()> {
        if self.broken.lock().contains(id) {
            return Err(PurchaseError::StoreUnavailable(format!("outbox row {} locked", id)));
        }
        Ok(())
    }
}

impl OutboxStore for FlakyOutboxStore {
    fn append(&self, entry: NewOutboxEntry) -> Result<String> {
        self.inner.append(entry)
    }

    fn get(&self, id: &str) -> Result<Option<OutboxEntry>> {
        self.inner.get(id)
    }

    fn pending_page(
        &self,
        cursor: Option<&PageCursor>,
        page_size: usize,
        now: DateTime<Utc>,
    ) -> Result<PendingPage> {
        self.inner.pending_page(cursor, page_size, now)
    }

    fn mark_sent(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.check(id)?;
        self.inner.mark_sent(id, at)
    }

    fn record_retry(
        &self,
        id: &str,
        at: DateTime<Utc>,
        next_attempt: &dyn Fn(u32) -> DateTime<Utc>,
    ) -> Result<bool> {
        self.check(id)?;
        self.inner.record_retry(id, at, next_attempt)
    }

    fn mark_dead(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.check(id)?;
        self.inner.mark_dead(id, at)
    }

    fn pending_count(&self) -> Result<usize> {
        self.inner.pending_count()
    }
}

/// Seat lock that can occupy but never release.
#[derive(Default)]
pub struct StuckSeatLock {
    inner: InMemorySeatLock,
    release_calls: AtomicUsize,
}

impl StuckSeatLock {
    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }
}

impl SeatLock for StuckSeatLock {
    fn occupy(&self, seat: &SeatKey) -> Result<OccupyOutcome> {
        self.inner.occupy(seat)
    }

    fn release(&self, _seat: &SeatKey) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        Err(PurchaseError::StoreUnavailable("seat store offline".to_string()))
    }

    fn is_held(&self, seat: &SeatKey) -> Result<bool> {
        self.inner.is_held(seat)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingSink {
    async fn emit(&self, record: &DeadLetterRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
