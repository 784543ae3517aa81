use serde::{Deserialize, Serialize};
use std::fmt;

/// One purchasable seat for one event instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatKey {
    pub event_id: String,
    pub venue_id: String,
    pub zone_id: u32,
    pub row: String,
    pub column: String,
}

impl SeatKey {
    pub fn new(
        event_id: impl Into<String>,
        venue_id: impl Into<String>,
        zone_id: u32,
        row: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            venue_id: venue_id.into(),
            zone_id,
            row: row.into(),
            column: column.into(),
        }
    }

    /// Row and column as the `A-7` label used in logs and dead letters.
    pub fn seat_label(&self) -> String {
        format!("{}-{}", self.row, self.column)
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event {} venue {} zone {} seat {}-{}",
            self.event_id, self.venue_id, self.zone_id, self.row, self.column
        )
    }
}

/// Result of an occupy attempt. A conflict is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupyOutcome {
    Acquired,
    Conflict,
}

impl OccupyOutcome {
    pub fn is_acquired(self) -> bool {
        self == Self::Acquired
    }
}
