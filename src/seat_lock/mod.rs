//! Atomic seat reservation.
//!
//! `occupy` is a single check-and-set against the shared store: of any
//! number of concurrent callers on one seat exactly one sees `Acquired`.
//! `release` is idempotent. Holds never expire on their own.

mod in_memory;
mod rocksdb_lock;

pub use in_memory::InMemorySeatLock;
pub use rocksdb_lock::RocksDbSeatLock;

use crate::{OccupyOutcome, Result, SeatKey};

pub trait SeatLock: Send + Sync {
    fn occupy(&self, seat: &SeatKey) -> Result<OccupyOutcome>;

    /// Never fails for a seat that is not held.
    fn release(&self, seat: &SeatKey) -> Result<()>;

    fn is_held(&self, seat: &SeatKey) -> Result<bool>;
}
