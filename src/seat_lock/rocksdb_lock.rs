use super::SeatLock;
use crate::{seat_lock_key, OccupyOutcome, PurchaseError, Result, RocksDBStore, SeatKey};
use std::sync::Arc;
use tracing::debug;

const HELD_MARKER: &[u8] = b"1";

/// Durable seat markers. The existence check and the write share one
/// transaction that holds the key's row lock, so they cannot interleave
/// with another occupy on the same seat.
#[derive(Clone)]
pub struct RocksDbSeatLock {
    store: Arc<RocksDBStore>,
}

impl RocksDbSeatLock {
    pub fn new(store: Arc<RocksDBStore>) -> Self {
        Self { store }
    }
}

impl SeatLock for RocksDbSeatLock {
    fn occupy(&self, seat: &SeatKey) -> Result<OccupyOutcome> {
        let key = seat_lock_key(seat);
        let outcome = self.store.transact(|txn| {
            if txn.get_for_update(&key, true)?.is_some() {
                return Ok(OccupyOutcome::Conflict);
            }
            txn.put(&key, HELD_MARKER)?;
            Ok(OccupyOutcome::Acquired)
        })
        .map_err(unavailable)?;

        debug!("Occupy {} -> {:?}", key, outcome);
        Ok(outcome)
    }

    fn release(&self, seat: &SeatKey) -> Result<()> {
        self.store.delete(&seat_lock_key(seat)).map_err(unavailable)
    }

    fn is_held(&self, seat: &SeatKey) -> Result<bool> {
        self.store.contains_key(&seat_lock_key(seat)).map_err(unavailable)
    }
}

fn unavailable(e: PurchaseError) -> PurchaseError {
    match e {
        PurchaseError::RocksDB(e) => PurchaseError::StoreUnavailable(format!("seat store: {}", e)),
        other => other,
    }
}
