use crate::{PurchaseError, Result, SeatKey, VenueConfig, VenueSettings};
use std::collections::HashMap;
use tracing::{info, warn};

/// Venue kept for clients that predate per-venue configuration.
pub const LEGACY_VENUE_ID: &str = "Venue1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneLayout {
    pub row_count: u32,
    pub columns_per_row: u32,
    pub capacity: u32,
}

/// Read-only `(venueId, zoneId) -> layout` lookup built from configuration.
#[derive(Debug, Clone, Default)]
pub struct VenueRegistry {
    venues: HashMap<String, VenueSettings>,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &VenueConfig) -> Self {
        let mut registry = Self::new();
        for (venue_id, settings) in &config.venues {
            registry.insert(venue_id.clone(), *settings);
        }

        if let Some(layout) = config.default_layout {
            if registry.venues.contains_key(LEGACY_VENUE_ID) {
                warn!("Default layout overrides configured venue '{}'", LEGACY_VENUE_ID);
            }
            registry.insert(LEGACY_VENUE_ID.to_string(), layout);
        }

        if registry.venues.is_empty() {
            warn!("No venues found in configuration");
        } else {
            info!("Venue registry initialized with {} venues", registry.venues.len());
        }
        registry
    }

    pub fn insert(&mut self, venue_id: impl Into<String>, settings: VenueSettings) {
        self.venues.insert(venue_id.into(), settings);
    }

    pub fn with_venue(mut self, venue_id: impl Into<String>, settings: VenueSettings) -> Self {
        self.insert(venue_id, settings);
        self
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    pub fn zone(&self, venue_id: &str, zone_id: u32) -> Option<ZoneLayout> {
        let venue = self.venues.get(venue_id)?;
        if zone_id == 0 || zone_id > venue.zone_count {
            return None;
        }
        Some(ZoneLayout {
            row_count: venue.row_count,
            columns_per_row: venue.col_count,
            capacity: venue.row_count.saturating_mul(venue.col_count),
        })
    }

    /// Checks the coordinates against the configured zone and returns the
    /// canonical key for the seat: trimmed event id, row as its letter label
    /// and column as an unpadded number. Aliases such as `a`, `1` and `A`, or
    /// `07` and `7`, all map to one key.
    pub fn validate(&self, seat: &SeatKey) -> Result<SeatKey> {
        let event_id = seat.event_id.trim();
        if event_id.is_empty() {
            return Err(PurchaseError::InvalidSeat("eventId must not be blank".to_string()));
        }

        let layout = self.zone(&seat.venue_id, seat.zone_id).ok_or_else(|| {
            PurchaseError::InvalidSeat(format!(
                "unknown zone {} in venue {}",
                seat.zone_id, seat.venue_id
            ))
        })?;

        let row = match row_index(&seat.row) {
            Some(row) if row <= layout.row_count => row,
            _ => {
                return Err(PurchaseError::InvalidSeat(format!(
                    "row {} outside 1..={} in zone {}",
                    seat.row, layout.row_count, seat.zone_id
                )))
            }
        };

        let column = match column_index(&seat.column) {
            Some(col) if col <= layout.columns_per_row => col,
            _ => {
                return Err(PurchaseError::InvalidSeat(format!(
                    "column {} outside 1..={} in zone {}",
                    seat.column, layout.columns_per_row, seat.zone_id
                )))
            }
        };

        Ok(SeatKey::new(
            event_id,
            seat.venue_id.as_str(),
            seat.zone_id,
            row_label(row),
            column.to_string(),
        ))
    }
}

/// 1-based row number. Letters count like spreadsheet columns (`A` = 1,
/// `Z` = 26, `AA` = 27); plain numbers are taken as is.
pub fn row_index(label: &str) -> Option<u32> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    if label.bytes().all(|b| b.is_ascii_digit()) {
        return label.parse().ok().filter(|n| *n >= 1);
    }
    label.bytes().try_fold(0u32, |acc, b| {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        let digit = u32::from(b.to_ascii_uppercase() - b'A') + 1;
        acc.checked_mul(26)?.checked_add(digit)
    })
}

/// Letter label of a 1-based row number, the inverse of `row_index`.
pub fn row_label(mut index: u32) -> String {
    let mut label = String::new();
    while index > 0 {
        let rem = ((index - 1) % 26) as u8;
        label.insert(0, char::from(b'A' + rem));
        index = (index - 1) / 26;
    }
    label
}

/// 1-based column number.
pub fn column_index(label: &str) -> Option<u32> {
    label.trim().parse().ok().filter(|n| *n >= 1)
}
