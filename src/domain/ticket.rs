use crate::SeatKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Created,
    Paid,
    Cancelled,
}

/// What a successful purchase hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketReceipt {
    pub ticket_id: String,
    pub seat: SeatKey,
    pub status: TicketStatus,
    pub created_on: DateTime<Utc>,
}

/// Domain event announced downstream once a seat is sold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketCreated {
    pub ticket_id: String,
    pub venue_id: String,
    pub event_id: String,
    pub zone_id: u32,
    pub row: String,
    pub column: String,
    pub status: TicketStatus,
    pub created_on: DateTime<Utc>,
}

impl TicketCreated {
    pub fn from_receipt(receipt: &TicketReceipt) -> Self {
        Self {
            ticket_id: receipt.ticket_id.clone(),
            venue_id: receipt.seat.venue_id.clone(),
            event_id: receipt.seat.event_id.clone(),
            zone_id: receipt.seat.zone_id,
            row: receipt.seat.row.clone(),
            column: receipt.seat.column.clone(),
            status: receipt.status,
            created_on: receipt.created_on,
        }
    }

    pub fn seat(&self) -> SeatKey {
        SeatKey::new(
            self.event_id.clone(),
            self.venue_id.clone(),
            self.zone_id,
            self.row.clone(),
            self.column.clone(),
        )
    }

    /// Tickets of one venue land on the same partition.
    pub fn partition_key(&self) -> &str {
        &self.venue_id
    }
}
