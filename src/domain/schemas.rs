use crate::SeatKey;
use chrono::{DateTime, Utc};

// Kafka topic definitions
pub struct Topics;

impl Topics {
    pub const TICKET_CREATED: &'static str = "ticket.created";
    pub const TICKET_DEAD_LETTER: &'static str = "ticket.created.dlq";
}

// Outbox event types
pub struct EventTypes;

impl EventTypes {
    pub const TICKET_CREATED: &'static str = "ticket.created";
}

// Key layout inside the shared state store
pub struct Keys;

impl Keys {
    pub const SEAT_PREFIX: &'static str = "seat:";
    pub const OUTBOX_ENTRY_PREFIX: &'static str = "outbox:entry:";
    pub const OUTBOX_PENDING_PREFIX: &'static str = "outbox:pending:";
}

// Utility functions for key generation
pub fn seat_lock_key(seat: &SeatKey) -> String {
    format!(
        "{}{}:{}:{}:{}:{}",
        Keys::SEAT_PREFIX,
        seat.event_id,
        seat.venue_id,
        seat.zone_id,
        seat.row,
        seat.column
    )
}

pub fn outbox_entry_key(id: &str) -> String {
    format!("{}{}", Keys::OUTBOX_ENTRY_PREFIX, id)
}

/// Sort key of a pending entry: creation time first, id as tie breaker.
/// Zero padded so lexicographic order matches chronological order.
pub fn outbox_sort_key(created_at: DateTime<Utc>, id: &str) -> String {
    let micros = created_at.timestamp_micros().max(0) as u64;
    format!("{:020}:{}", micros, id)
}

pub fn outbox_pending_key(created_at: DateTime<Utc>, id: &str) -> String {
    format!("{}{}", Keys::OUTBOX_PENDING_PREFIX, outbox_sort_key(created_at, id))
}
