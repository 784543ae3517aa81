pub mod producer;
pub mod publisher;
pub mod rocksdb_store;

pub use producer::*;
pub use publisher::*;
pub use rocksdb_store::*;
