use super::SeatLock;
use crate::{seat_lock_key, OccupyOutcome, Result, SeatKey};
use dashmap::DashSet;
use std::sync::Arc;

/// Process-local seat markers. Clones share the same set.
#[derive(Clone, Default)]
pub struct InMemorySeatLock {
    held: Arc<DashSet<String>>,
}

impl InMemorySeatLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

impl SeatLock for InMemorySeatLock {
    fn occupy(&self, seat: &SeatKey) -> Result<OccupyOutcome> {
        // insert is atomic under the shard lock
        if self.held.insert(seat_lock_key(seat)) {
            Ok(OccupyOutcome::Acquired)
        } else {
            Ok(OccupyOutcome::Conflict)
        }
    }

    fn release(&self, seat: &SeatKey) -> Result<()> {
        self.held.remove(&seat_lock_key(seat));
        Ok(())
    }

    fn is_held(&self, seat: &SeatKey) -> Result<bool> {
        Ok(self.held.contains(&seat_lock_key(seat)))
    }
}
